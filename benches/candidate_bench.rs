//! Signalling-path benchmarks.
//!
//! Candidate parsing and rewriting run once per offer/answer, envelope
//! coding once per pooled text message.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use peerproxy::net::Endpoint;
use peerproxy::obfuscation::{
    extract_endpoint_from_candidate_line, filter_candidates_from_sdp, redirect_host_candidates,
};
use peerproxy::pool::envelope;
use peerproxy::transport::Message;

const HOST: &str =
    "a=candidate:129713316 2 udp 2122129151 172.26.108.25 40762 typ host generation 0";

fn offer(candidates: usize) -> String {
    let mut sdp = String::from(
        "v=0\r\no=- 3055156452807570418 3 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
         a=group:BUNDLE data\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
    );
    for i in 0..candidates {
        sdp.push_str(&format!(
            "a=candidate:{} 1 udp 2122260223 192.168.1.{} {} typ host generation 0\r\n",
            i,
            i % 250,
            50000 + i
        ));
    }
    sdp.push_str("a=ice-ufrag:ETnQpTTSTgfXZ6HZ\r\na=ice-pwd:secret\r\n");
    sdp
}

fn bench_extract(c: &mut Criterion) {
    c.bench_function("extract_endpoint", |b| {
        b.iter(|| black_box(extract_endpoint_from_candidate_line(black_box(HOST)).unwrap()))
    });
}

fn bench_sdp(c: &mut Criterion) {
    let mut group = c.benchmark_group("sdp");

    for candidates in [4, 32] {
        let sdp = offer(candidates);
        let relay = Endpoint::new("198.51.100.7", 3478);
        group.throughput(Throughput::Bytes(sdp.len() as u64));

        group.bench_function(format!("filter_{}", candidates), |b| {
            b.iter(|| black_box(filter_candidates_from_sdp(&sdp)))
        });
        group.bench_function(format!("redirect_{}", candidates), |b| {
            b.iter(|| black_box(redirect_host_candidates(&sdp, &relay)))
        });
    }

    group.finish();
}

fn bench_envelope(c: &mut Criterion) {
    let text = r#"{"reply":"SUCCEEDED","endpoint":{"address":"10.0.0.5","port":51000}}"#;
    let wire = envelope::encode(Message::from(text)).unwrap();

    let mut group = c.benchmark_group("envelope");
    group.bench_function("encode", |b| {
        b.iter(|| black_box(envelope::encode(Message::from(text)).unwrap()))
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(envelope::decode(wire.clone()).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_extract, bench_sdp, bench_envelope);
criterion_main!(benches);

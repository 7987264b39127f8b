use criterion::{black_box, criterion_group, criterion_main, Criterion};

use intercom::crypto::stretch::{stretch_key, StretchLimits};
use intercom::crypto::{open_payload, NotificationKey};
use intercom::e2e_common::{DeviceSimulator, TEST_SESSION_KEY};
use intercom::events::{verify_identity, DecryptedPayload, NotificationEvent};
use intercom::packet::parse_packet;

fn bench_v2_decode(c: &mut Criterion) {
    let key = NotificationKey::from_slice(TEST_SESSION_KEY.as_bytes()).unwrap();
    let payload = DecryptedPayload::new("foobar", "doorbell", 1_609_459_200);
    let datagram = DeviceSimulator::v2_packet(&key, &payload).to_bytes();

    c.bench_function("v2_parse_open_classify", |b| {
        b.iter(|| {
            let packet = parse_packet(black_box(&datagram)).unwrap();
            let plaintext = open_payload(&key, packet.nonce(), packet.ciphertext()).unwrap();
            let payload = DecryptedPayload::from_bytes(&plaintext);
            verify_identity(&payload, "foobar").unwrap();
            black_box(NotificationEvent::classify(&payload))
        })
    });
}

fn bench_v1_stretch(c: &mut Criterion) {
    let limits = StretchLimits::default();
    let salt = [0x42u8; 16];
    c.bench_function("v1_stretch_ops4_mem8k", |b| {
        b.iter(|| stretch_key("hunter22", black_box(&salt), 4, 0x2000, &limits).unwrap())
    });
}

criterion_group!(benches, bench_v2_decode, bench_v1_stretch);
criterion_main!(benches);

//! Server performance benchmarks for Sealbox
//!
//! These benchmarks measure server-side operations that don't require
//! a live network connection.
//!
//! Benchmarked:
//! - State initialization (in-memory DB)
//! - User registration throughput
//! - Login and credential issuance
//! - Credential verification
//! - One-time prekey provisioning and bundle consumption
//! - Relay send with an online receiver (simulated connection)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use sealbox_server::credentials::CredentialSigner;
use sealbox_server::models::{MessageType, OneTimePreKey};
use sealbox_server::state::{AppState, RelayConfig};

fn rt() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn roomy() -> RelayConfig {
    RelayConfig {
        max_users: u32::MAX,
        credential_secret: None,
    }
}

// ─── State initialization ────────────────────────────────────────────────────

fn bench_state_init(c: &mut Criterion) {
    let rt = rt();
    c.bench_function("state/init_in_memory", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(AppState::new_in_memory().await.unwrap());
        });
    });
}

// ─── User registration ──────────────────────────────────────────────────────

fn bench_user_registration(c: &mut Criterion) {
    let rt = rt();
    c.bench_function("user/register", |b| {
        let state = rt.block_on(AppState::new_in_memory_with(roomy())).unwrap();
        let mut counter = 0u64;
        b.to_async(&rt).iter(|| {
            counter += 1;
            let username = format!("user_{}", counter);
            let state_ref = &state;
            async move {
                black_box(state_ref.register_user(&username, 1, "idk").await);
            }
        });
    });
}

// ─── Login and credential issuance ──────────────────────────────────────────

fn bench_login(c: &mut Criterion) {
    let rt = rt();
    let state = rt.block_on(AppState::new_in_memory_with(roomy())).unwrap();
    rt.block_on(state.register_user("bench_user", 1, "idk"))
        .unwrap();

    c.bench_function("user/login", |b| {
        b.to_async(&rt).iter(|| {
            let state_ref = &state;
            async move {
                black_box(state_ref.login_user("bench_user").await);
            }
        });
    });
}

// ─── Credential verification ────────────────────────────────────────────────

fn bench_credential_ops(c: &mut Criterion) {
    let signer = CredentialSigner::generate();
    let (token, _) = signer.issue(1, "bench_user");

    let mut group = c.benchmark_group("credential");

    group.bench_function("issue", |b| {
        b.iter(|| black_box(signer.issue(1, "bench_user")));
    });

    group.bench_function("verify", |b| {
        b.iter(|| black_box(signer.verify(&token)));
    });

    group.finish();
}

// ─── PreKey operations ──────────────────────────────────────────────────────

fn bench_prekey_flow(c: &mut Criterion) {
    let rt = rt();
    let state = rt.block_on(AppState::new_in_memory_with(roomy())).unwrap();
    let user = rt
        .block_on(state.register_user("prekey_user", 1, "idk"))
        .unwrap();
    rt.block_on(state.store_signed_prekey(user.id, 1, "spk", "sig"))
        .unwrap();

    let mut group = c.benchmark_group("prekeys");

    group.bench_function("upload_batch_10", |b| {
        let mut counter = 0i64;
        b.to_async(&rt).iter(|| {
            let base = counter * 10;
            counter += 1;
            let batch: Vec<OneTimePreKey> = (base + 1..=base + 10)
                .map(|key_id| OneTimePreKey {
                    key_id,
                    public_key: format!("opk_{}", key_id),
                })
                .collect();
            let state_ref = &state;
            let user_id = user.id;
            async move {
                black_box(
                    state_ref
                        .store_one_time_prekeys(user_id, &batch)
                        .await
                        .unwrap(),
                );
            }
        });
    });

    // Full provision-then-consume cycle so the supply never drains
    group.bench_function("provision_and_consume", |b| {
        let mut counter = 1_000_000i64;
        b.to_async(&rt).iter(|| {
            counter += 1;
            let key = [OneTimePreKey {
                key_id: counter,
                public_key: format!("opk_{}", counter),
            }];
            let state_ref = &state;
            let user_id = user.id;
            async move {
                state_ref
                    .store_one_time_prekeys(user_id, &key)
                    .await
                    .unwrap();
                black_box(state_ref.consume_bundle(user_id).await.unwrap());
            }
        });
    });

    group.finish();
}

// ─── Relay send ─────────────────────────────────────────────────────────────

fn bench_relay_send(c: &mut Criterion) {
    let rt = rt();

    let mut group = c.benchmark_group("relay");

    for size in [64, 256, 1024, 4096] {
        group.bench_with_input(
            BenchmarkId::new("send_delivered", size),
            &size,
            |b, &size| {
                let state = Arc::new(rt.block_on(AppState::new_in_memory_with(roomy())).unwrap());
                let alice = rt
                    .block_on(state.register_user("relay_alice", 1, "idk"))
                    .unwrap();
                let bob = rt
                    .block_on(state.register_user("relay_bob", 2, "idk"))
                    .unwrap();

                // Bind both ends; drain the receiver so the channel never fills
                let (alice_tx, mut alice_rx) = tokio::sync::mpsc::unbounded_channel();
                let (bob_tx, mut bob_rx) = tokio::sync::mpsc::unbounded_channel();
                rt.block_on(state.presence.bind(alice.id, uuid::Uuid::new_v4(), alice_tx));
                rt.block_on(state.presence.bind(bob.id, uuid::Uuid::new_v4(), bob_tx));
                rt.spawn(async move { while alice_rx.recv().await.is_some() {} });
                rt.spawn(async move { while bob_rx.recv().await.is_some() {} });

                let payload = "A".repeat(size);

                b.to_async(&rt).iter(|| {
                    let state_ref = state.clone();
                    let payload = payload.clone();
                    let (sender, receiver) = (alice.id, bob.id);
                    async move {
                        black_box(
                            state_ref
                                .relay_send(sender, receiver, MessageType::Text, &payload, None)
                                .await
                                .unwrap(),
                        );
                    }
                });
            },
        );
    }

    group.finish();
}

// ─── Groups ──────────────────────────────────────────────────────────────────

criterion_group!(
    benches,
    bench_state_init,
    bench_user_registration,
    bench_login,
    bench_credential_ops,
    bench_prekey_flow,
    bench_relay_send,
);
criterion_main!(benches);

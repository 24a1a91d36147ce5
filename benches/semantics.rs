//! Benchmarks for preference semantics on large slots.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use akh_decide::preference::{PreferenceStore, PreferenceType};
use akh_decide::semantics::{
    FirstChoice, SemanticsOptions, run_preference_semantics,
    run_preference_semantics_for_consistency_check,
};
use akh_decide::slot::Slot;
use akh_decide::symbol::SymbolId;

fn sym(raw: u64) -> SymbolId {
    SymbolId::new(raw).unwrap()
}

/// A context slot with `n` acceptable candidates and `n` random better
/// preferences between them.
fn slot_with_betters(n: u64) -> (Slot, PreferenceStore) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let mut slot = Slot::new(sym(1), sym(2));
    slot.isa_context_slot = true;
    let mut prefs = PreferenceStore::new();
    for v in 0..n {
        let p = prefs.make(PreferenceType::Acceptable, sym(1), sym(2), sym(100 + v), None);
        slot.insert_preference(PreferenceType::Acceptable, p);
    }
    for _ in 0..n {
        let a = rng.gen_range(0..n);
        let b = rng.gen_range(0..n);
        let p = prefs.make(
            PreferenceType::Better,
            sym(1),
            sym(2),
            sym(100 + a),
            Some(sym(100 + b)),
        );
        slot.insert_preference(PreferenceType::Better, p);
    }
    (slot, prefs)
}

/// `n` candidates that are all mutually indifferent through binary preferences.
fn slot_with_indifference(n: u64) -> (Slot, PreferenceStore) {
    let mut slot = Slot::new(sym(1), sym(2));
    slot.isa_context_slot = true;
    let mut prefs = PreferenceStore::new();
    for v in 0..n {
        let p = prefs.make(PreferenceType::Acceptable, sym(1), sym(2), sym(100 + v), None);
        slot.insert_preference(PreferenceType::Acceptable, p);
    }
    for a in 0..n {
        for b in (a + 1)..n {
            let p = prefs.make(
                PreferenceType::BinaryIndifferent,
                sym(1),
                sym(2),
                sym(100 + a),
                Some(sym(100 + b)),
            );
            slot.insert_preference(PreferenceType::BinaryIndifferent, p);
        }
    }
    (slot, prefs)
}

fn bench_better_worse(c: &mut Criterion) {
    let (slot, prefs) = slot_with_betters(200);
    c.bench_function("semantics_better_200", |bench| {
        bench.iter(|| {
            black_box(run_preference_semantics(
                &slot,
                &prefs,
                SemanticsOptions::default(),
                &mut FirstChoice,
            ))
        })
    });
}

fn bench_indifference(c: &mut Criterion) {
    let (slot, prefs) = slot_with_indifference(40);
    c.bench_function("semantics_indifferent_40", |bench| {
        bench.iter(|| {
            black_box(run_preference_semantics_for_consistency_check(
                &slot,
                &prefs,
                SemanticsOptions::default(),
            ))
        })
    });
}

criterion_group!(benches, bench_better_worse, bench_indifference);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, Criterion, black_box};

use persona_mcp_server::modification;
use persona_mcp_server::persona::{builtin_personas, Persona};
use persona_mcp_server::scoring;

fn bench_rank_builtins(c: &mut Criterion) {
    let personas = builtin_personas();
    c.bench_function("rank_builtin_personas", |bch| {
        bch.iter(|| black_box(scoring::rank(&personas, black_box("debug this Python code and explain the API errors"))));
    });
}

fn bench_rank_large_collection(c: &mut Criterion) {
    // 500 synthetic personas with overlapping expertise
    let personas: Vec<Persona> = (0..500)
        .map(|i| {
            Persona::new(format!("p{i}"), format!("Persona {i}"), format!("Specialist number {i} in area {}", i % 17), "You are a specialist.")
                .with_expertise(&["rust", "python", "testing", "databases"][..(i % 4) + 1])
                .with_traits(&["precise", "curious"])
                .with_style(if i % 2 == 0 { "technical" } else { "educational" })
        })
        .collect();
    c.bench_function("rank_500_personas", |bch| {
        bch.iter(|| black_box(scoring::rank(&personas, black_box("explain python testing strategies for databases"))));
    });
}

fn bench_modification(c: &mut Criterion) {
    let persona = builtin_personas().remove(0);
    let instruction = "change the name to \"Reviewer\", make it formal and concise, add security and react";
    c.bench_function("apply_modification", |bch| {
        bch.iter(|| black_box(modification::apply(&persona, Some(black_box(instruction)))));
    });
}

criterion_group!(benches, bench_rank_builtins, bench_rank_large_collection, bench_modification);
criterion_main!(benches);

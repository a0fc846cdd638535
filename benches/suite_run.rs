//! Performance benchmarks for suite evaluation.
//!
//! Run with: cargo bench --bench suite_run
//!
//! Covers the three costs of a run: document parsing, selector extraction
//! and rule dispatch, sequentially and across the rayon pool.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mdqa::{Check, Engine, EngineConfig, Level, RunContext, Selector, Suite};
use std::hint::black_box;

/// Generate an EML-like document with the given number of data tables.
fn generate_document(entities: usize) -> String {
    let mut xml = String::from(
        "<eml:eml xmlns:eml=\"https://eml.ecoinformatics.org/eml-2.2.0\"><dataset>\
         <title>Benchmark dataset with a reasonably long descriptive title</title>",
    );
    for i in 0..entities {
        xml.push_str(&format!(
            "<dataTable><entityName>table-{i}.csv</entityName><attributeList>\
             <attribute><attributeName>site</attributeName></attribute>\
             <attribute><attributeName>value_{i}</attributeName></attribute>\
             </attributeList></dataTable>"
        ));
    }
    xml.push_str("</dataset></eml:eml>");
    xml
}

/// Generate a suite alternating R and ECMAScript checks.
fn generate_suite(checks: usize) -> Suite {
    let mut suite = Suite::new("bench.suite", "Benchmark");
    for i in 0..checks {
        let check = if i % 2 == 0 {
            Check::new(format!("r.{i}"))
                .environment("r")
                .level(Level::Required)
                .selector(Selector::xpath("names", "//attributeName"))
                .code("status <- if (any(duplicated(names))) 'FAILURE' else 'SUCCESS'")
        } else {
            Check::new(format!("ecma.{i}"))
                .environment("ecma")
                .level(Level::Info)
                .selector(Selector::xpath("title", "/eml:eml/dataset/title"))
                .code("status = title.split(' ').length >= 5 ? 'SUCCESS' : 'FAILURE'")
        };
        suite.checks.push(check);
    }
    suite
}

fn bench_document_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_parse");
    for entities in &[10, 100, 1000] {
        let xml = generate_document(*entities);
        group.bench_with_input(BenchmarkId::new("eml", entities), &xml, |b, xml| {
            b.iter(|| mdqa::parse_document(black_box(xml), 0));
        });
    }
    group.finish();
}

fn bench_suite_run(c: &mut Criterion) {
    let document = generate_document(100);
    let ctx = RunContext::new("bench");
    let sequential = Engine::new(EngineConfig::builder().parallel(false).build())
        .expect("valid config");
    let parallel = Engine::new(EngineConfig::default()).expect("valid config");

    let mut group = c.benchmark_group("suite_run");
    for checks in &[4, 16, 64] {
        let suite = generate_suite(*checks);
        group.bench_with_input(BenchmarkId::new("sequential", checks), &suite, |b, suite| {
            b.iter(|| sequential.run_suite(black_box(suite), &document, &ctx));
        });
        group.bench_with_input(BenchmarkId::new("parallel", checks), &suite, |b, suite| {
            b.iter(|| parallel.run_suite(black_box(suite), &document, &ctx));
        });
    }
    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let engine = Engine::new(EngineConfig::default()).expect("valid config");
    let suite = generate_suite(64);
    let run = engine
        .run_suite(&suite, &generate_document(10), &RunContext::new("bench"))
        .expect("run");
    let scorer = engine.scorer();

    c.bench_function("score_64_results", |b| {
        b.iter(|| scorer.score(black_box(&run), Some(&suite)));
    });
}

criterion_group!(benches, bench_document_parsing, bench_suite_run, bench_scoring);
criterion_main!(benches);

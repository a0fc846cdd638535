//! Integration tests for mdqa
//!
//! These tests verify end-to-end behaviour: loading suites from disk,
//! running them against metadata documents, scoring the runs and writing
//! them back out.

use mdqa::serialize::{
    load_suite, run_from_json, run_from_xml, run_to_json, run_to_xml, suite_from_json,
    suite_from_xml, suite_to_json, suite_to_xml,
};
use mdqa::{
    Check, CheckResult, Engine, EngineConfig, Level, QualityGrade, QualityScorer, Run, RunContext,
    Selector, Status, Suite, Sysmeta,
};
use std::path::Path;
use std::time::{Duration, Instant};

// ============================================================================
// Test Fixtures
// ============================================================================

const FIXTURES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

fn fixture_path(name: &str) -> std::path::PathBuf {
    Path::new(FIXTURES_DIR).join(name)
}

fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("Failed to read fixture")
}

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default config is valid")
}

fn statuses(run: &Run) -> Vec<Status> {
    run.results.iter().map(|r| r.status).collect()
}

// ============================================================================
// Suite Loading Tests
// ============================================================================

mod loading_tests {
    use super::*;

    #[test]
    fn test_load_current_suite() {
        let suite = load_suite(&fixture_path("suites/basic.xml")).expect("Failed to load suite");
        assert_eq!(suite.id, "test.suite.basic");
        assert_eq!(suite.checks.len(), 3);
        assert_eq!(suite.namespaces.len(), 1);
        assert_eq!(suite.checks[1].level, Some(Level::Warn));
        assert!(suite.checks[0].code.as_deref().unwrap_or_default().contains("strsplit"));
    }

    #[test]
    fn test_load_legacy_suite() {
        let suite = load_suite(&fixture_path("suites/legacy.xml")).expect("Failed to load suite");
        assert_eq!(suite.checks.len(), 2);
        let code = suite.checks[0].code.as_deref().unwrap_or_default();
        assert!(code.contains("&&"), "entities should be decoded: {code}");
        assert!(code.contains("<-"));
    }

    #[test]
    fn test_load_json_suite() {
        let suite = load_suite(&fixture_path("suites/json-record.json")).expect("Failed to load suite");
        assert_eq!(suite.checks.len(), 3);
        assert!(suite.checks[1].selectors[0].sub_selector.is_some());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_suite(&fixture_path("suites/absent.xml")).unwrap_err();
        assert!(err.to_string().contains("absent.xml"));
    }
}

// ============================================================================
// Run Scenario Tests
// ============================================================================

mod run_tests {
    use super::*;

    #[test]
    fn test_basic_suite_against_eml() {
        let suite = load_suite(&fixture_path("suites/basic.xml")).unwrap();
        let run = engine()
            .run_suite(&suite, &fixture("documents/eml.xml"), &RunContext::new("doi:10.5063/F1LAKE01"))
            .expect("run should complete");

        assert_eq!(run.suite_id, "test.suite.basic");
        assert_eq!(run.object_identifier, "doi:10.5063/F1LAKE01");
        assert_eq!(
            statuses(&run),
            vec![Status::Success, Status::Failure, Status::Success]
        );
        assert_eq!(run.results[0].message(), Some("The title has 7 words"));
        assert_eq!(
            run.results[1].message(),
            Some("Duplicate attribute names in entity 2")
        );
        let levels: Vec<Level> = run.results.iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![Level::Required, Level::Warn, Level::Info]);
    }

    #[test]
    fn test_zero_match_still_dispatches() {
        let suite = load_suite(&fixture_path("suites/legacy.xml")).unwrap();
        let run = engine()
            .run_suite(&suite, &fixture("documents/eml.xml"), &RunContext::new("obj"))
            .unwrap();
        assert_eq!(run.results[0].status, Status::Success);
        let keywords = &run.results[1];
        assert_eq!(keywords.status, Status::Failure);
        assert_eq!(keywords.message(), Some("No keywords found"));
    }

    #[test]
    fn test_json_document_with_dialect_gate() {
        let suite = load_suite(&fixture_path("suites/json-record.json")).unwrap();
        let run = engine()
            .run_suite(&suite, &fixture("documents/record.json"), &RunContext::new("obj"))
            .unwrap();
        assert_eq!(
            statuses(&run),
            vec![Status::Success, Status::Failure, Status::Skip]
        );
        assert_eq!(run.results[1].message(), Some("1 of 2 creators lack an ORCID"));
        assert_eq!(run.results[2].message(), Some("dialect not supported"));
    }

    #[test]
    fn test_throwing_check_is_isolated() {
        let suite = Suite::new("suite.throwing", "Throwing")
            .with_check(
                Check::new("before")
                    .environment("ecma")
                    .selector(Selector::xpath("title", "//dataset/title"))
                    .code("status = title.length > 0 ? 'SUCCESS' : 'FAILURE'"),
            )
            .with_check(
                Check::new("throws")
                    .environment("r")
                    .code("stop('abstract is not a string')"),
            )
            .with_check(Check::new("after").environment("ecma").code("'SUCCESS'"));
        let run = engine()
            .run_suite(&suite, &fixture("documents/eml.xml"), &RunContext::new("obj"))
            .unwrap();
        assert_eq!(run.len(), 3);
        assert_eq!(
            statuses(&run),
            vec![Status::Success, Status::Error, Status::Success]
        );
        assert_eq!(run.results[1].message(), Some("abstract is not a string"));
    }

    #[test]
    fn test_non_terminating_check_times_out() {
        let config = EngineConfig::builder()
            .timeout(Duration::from_millis(300))
            .build();
        let suite = Suite::new("suite.loop", "Loops")
            .with_check(Check::new("spins").environment("ecma").code("while (true) {}"))
            .with_check(Check::new("spins.r").environment("r").code("repeat { x <- 1 }"))
            .with_check(Check::new("fine").environment("r").code("TRUE"));

        let started = Instant::now();
        let run = Engine::new(config)
            .unwrap()
            .run_suite(&suite, "<eml/>", &RunContext::new("obj"))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            statuses(&run),
            vec![Status::Error, Status::Error, Status::Success]
        );
        assert!(run.results[0]
            .message()
            .unwrap_or_default()
            .contains("timed out"));
    }

    #[test]
    fn test_deeply_nested_document_is_rejected_not_fatal() {
        let nested = |depth: usize| format!("{}deep{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let suite = Suite::new("suite.depth", "Depth").with_check(
            Check::new("root.text")
                .environment("r")
                .selector(Selector::xpath("x", "/a"))
                .code("status <- if (x == 'deep') 'SUCCESS' else 'FAILURE'"),
        );
        let run = engine()
            .run_suite(&suite, &nested(1500), &RunContext::new("obj"))
            .unwrap();
        assert_eq!(run.results[0].status, Status::Success);

        let err = engine()
            .run_suite(&suite, &nested(20_000), &RunContext::new("obj"))
            .unwrap_err();
        assert!(err.is_process_error());
    }

    #[test]
    fn test_malformed_document_aborts_run() {
        let suite = load_suite(&fixture_path("suites/basic.xml")).unwrap();
        let err = engine()
            .run_suite(&suite, "<eml:eml><dataset>", &RunContext::new("obj"))
            .unwrap_err();
        assert!(err.is_process_error());
    }
}

// ============================================================================
// Scoring Tests
// ============================================================================

mod scoring_tests {
    use super::*;

    fn six_result_run() -> Run {
        let mut run = Run::new("obj", "suite");
        for (i, (level, status)) in [
            (Level::Info, Status::Failure),
            (Level::Warn, Status::Skip),
            (Level::Info, Status::Success),
            (Level::Severe, Status::Success),
            (Level::Warn, Status::Success),
            (Level::Warn, Status::Success),
        ]
        .into_iter()
        .enumerate()
        {
            run.results.push(CheckResult::new(format!("check.{i}"), level, status));
        }
        run
    }

    #[test]
    fn test_six_result_ratios() {
        let run = six_result_run();
        let scorer = QualityScorer::default();
        assert!((scorer.ratio(&run, Status::Success) - 4.0 / 6.0).abs() < 1e-9);
        assert!((scorer.ratio(&run, Status::Failure) - 1.0 / 6.0).abs() < 1e-9);
        assert!((scorer.ratio(&run, Status::Skip) - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(scorer.ratio(&run, Status::Error), 0.0);
        assert!((scorer.composite_score(&run) - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_six_result_weighted_and_grade() {
        let run = six_result_run();
        let card = QualityScorer::default().score(&run, None);
        // weights: INFO 2, WARN 3, SEVERE 6
        assert!((card.weighted_score - 14.0 / 19.0).abs() < 1e-9);
        assert_eq!(card.total, 6);
        assert_eq!(card.grade, QualityGrade::D);
    }

    #[test]
    fn test_scores_of_live_run() {
        let suite = load_suite(&fixture_path("suites/basic.xml")).unwrap();
        let engine = engine();
        let run = engine
            .run_suite(&suite, &fixture("documents/eml.xml"), &RunContext::new("obj"))
            .unwrap();
        let card = engine.scorer().score(&run, Some(&suite));
        // REQUIRED 4 and INFO 2 succeed, WARN 3 fails
        assert!((card.weighted_score - 6.0 / 9.0).abs() < 1e-9);
        assert_eq!(card.success.count, 2);
        assert_eq!(card.failure.count, 1);
    }

    #[test]
    fn test_empty_run_scores_zero() {
        let run = Run::new("obj", "suite");
        let card = QualityScorer::default().score(&run, None);
        assert_eq!(card.composite_score, 0.0);
        assert_eq!(card.weighted_score, 0.0);
        assert_eq!(card.grade, QualityGrade::F);
    }
}

// ============================================================================
// Serialization Tests
// ============================================================================

mod serialization_tests {
    use super::*;

    #[test]
    fn test_three_check_suite_round_trip() {
        let suite = load_suite(&fixture_path("suites/basic.xml")).unwrap();
        let xml = suite_to_xml(&suite).unwrap();
        let parsed = suite_from_xml(&xml).unwrap();
        assert_eq!(parsed.name, suite.name);
        assert_eq!(parsed.checks.len(), 3);
        assert_eq!(parsed, suite);
    }

    #[test]
    fn test_legacy_suite_rewritten_as_current() {
        let legacy = load_suite(&fixture_path("suites/legacy.xml")).unwrap();
        let xml = suite_to_xml(&legacy).unwrap();
        assert!(xml.contains("https://nceas.ucsb.edu/mdqe/v1.2"));
        assert!(xml.contains("<![CDATA[status <- if (!is.null(abstract) && nchar(abstract) > 20)"));
        assert_eq!(suite_from_xml(&xml).unwrap(), legacy);
    }

    #[test]
    fn test_code_with_entities_round_trips_verbatim() {
        let code = r#"status <- if (grepl("&amp;", title) || grepl("&lt;b&gt;", title)) "FAILURE" else "SUCCESS""#;
        let suite = Suite::new("suite.entities", "Entities")
            .with_check(Check::new("title.markup").environment("r").code(code));

        let xml = suite_to_xml(&suite).unwrap();
        assert_eq!(suite_from_xml(&xml).unwrap().checks[0].code.as_deref(), Some(code));

        let json = suite_to_json(&suite).unwrap();
        assert_eq!(suite_from_json(&json).unwrap().checks[0].code.as_deref(), Some(code));
    }

    #[test]
    fn test_run_round_trip_keeps_outputs_and_sysmeta() {
        let suite = load_suite(&fixture_path("suites/basic.xml")).unwrap();
        let mut sysmeta = Sysmeta::new(
            "urn:node:KNB",
            "CN=Ana Jones,O=Google,C=US,DC=cilogon,DC=org",
            "https://eml.ecoinformatics.org/eml-2.2.0",
        );
        sysmeta.groups = vec!["CN=knb-data-admins".into(), "CN=lter-sites".into()];
        sysmeta.date_uploaded = Some("2019-03-07T18:02:41.250Z".parse().unwrap());
        sysmeta.series_id = Some("urn:uuid:lake-chemistry".into());
        let ctx = RunContext::new("obj").with_sysmeta(sysmeta.clone());
        let run = engine()
            .run_suite(&suite, &fixture("documents/eml.xml"), &ctx)
            .unwrap();

        let xml = run_to_xml(&run).unwrap();
        assert!(xml.contains("<formatId>https://eml.ecoinformatics.org/eml-2.2.0</formatId>"));
        let parsed = run_from_xml(&xml).unwrap();
        assert_eq!(parsed.id, run.id);
        assert_eq!(statuses(&parsed), statuses(&run));
        assert_eq!(parsed.results[0].outputs, run.results[0].outputs);
        assert_eq!(parsed.results[1].level, Level::Warn);
        assert_eq!(parsed.sysmeta.as_ref(), Some(&sysmeta));

        let json = run_to_json(&run).unwrap();
        assert!(json.contains("\"originMemberNode\": \"urn:node:KNB\""));
        assert_eq!(run_from_json(&json).unwrap(), run);
    }

    #[test]
    fn test_run_without_sysmeta_omits_it() {
        let suite = load_suite(&fixture_path("suites/basic.xml")).unwrap();
        let run = engine()
            .run_suite(&suite, &fixture("documents/eml.xml"), &RunContext::new("obj"))
            .unwrap();
        assert!(!run_to_xml(&run).unwrap().contains("sysmeta"));
        assert_eq!(run_from_xml(&run_to_xml(&run).unwrap()).unwrap().sysmeta, None);
    }
}

// ============================================================================
// Isolation Tests
// ============================================================================

mod isolation_tests {
    use super::*;

    fn isolation_suite() -> Suite {
        let ecma_check = |id: &str, path: &str, expected: &str| {
            Check::new(id)
                .environment("ecma")
                .selector(Selector::xpath("value", path))
                .code(format!(
                    "if (typeof leaked !== 'undefined') {{ status = 'FAILURE'; output = 'saw ' + leaked }} \
                     else {{ leaked = value; status = String(value) === '{expected}' ? 'SUCCESS' : 'FAILURE'; output = String(value) }}"
                ))
        };
        let r_check = |id: &str, path: &str, expected: &str| {
            Check::new(id)
                .environment("r")
                .selector(Selector::xpath("value", path))
                .code(format!(
                    "if (exists('leaked')) {{ status <- 'FAILURE' }} else {{ leaked <- value; \
                     status <- if (as.character(value) == '{expected}') 'SUCCESS' else 'FAILURE'; output <- as.character(value) }}"
                ))
        };
        let mut suite = Suite::new("suite.isolation", "Isolation");
        for i in 0..6 {
            suite.checks.push(ecma_check(&format!("ecma.count.{i}"), "count(//dataTable)", "2"));
            suite.checks.push(ecma_check(&format!("ecma.given.{i}"), "//givenName", "Ana"));
            suite.checks.push(r_check(&format!("r.surname.{i}"), "//surName", "Jones"));
            suite.checks.push(r_check(&format!("r.entity.{i}"), "(//entityName)[1]", "chemistry.csv"));
        }
        suite
    }

    fn outcome(run: &Run) -> Vec<(String, Status, Option<String>)> {
        run.results
            .iter()
            .map(|r| (r.check_id.clone(), r.status, r.message().map(String::from)))
            .collect()
    }

    #[test]
    fn test_sequential_and_concurrent_runs_agree() {
        let suite = isolation_suite();
        let document = fixture("documents/eml.xml");
        let ctx = RunContext::new("obj");

        let sequential = Engine::new(EngineConfig::builder().parallel(false).build())
            .unwrap()
            .run_suite(&suite, &document, &ctx)
            .unwrap();
        let concurrent = Engine::new(EngineConfig::builder().parallel(true).max_threads(Some(4)).build())
            .unwrap()
            .run_suite(&suite, &document, &ctx)
            .unwrap();

        assert!(sequential.results.iter().all(|r| r.status == Status::Success));
        assert_eq!(outcome(&sequential), outcome(&concurrent));
    }

    #[test]
    fn test_parallel_runs_share_one_engine() {
        let engine = std::sync::Arc::new(engine());
        let suite = std::sync::Arc::new(isolation_suite());
        let document = std::sync::Arc::new(fixture("documents/eml.xml"));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let (engine, suite, document) = (engine.clone(), suite.clone(), document.clone());
                std::thread::spawn(move || {
                    engine
                        .run_suite(&suite, &document, &RunContext::new(format!("obj.{i}")))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            let run = handle.join().unwrap();
            assert_eq!(run.len(), 24);
            assert_eq!(run.count(Status::Success), 24);
        }
    }
}

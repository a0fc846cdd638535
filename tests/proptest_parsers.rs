//! Property-based tests for suite, document and path parsers.
//!
//! Ensures parsers don't panic on arbitrary input, including random strings,
//! XML-like fragments and path expressions.

use mdqa::document::{JsonPath, XPath};
use mdqa::parse_document;
use mdqa::serialize::{suite_from_str, suite_from_xml};
use proptest::prelude::*;

proptest! {
    // 500 cases balances coverage vs speed for parser fuzz tests.
    // Parser tests intentionally only assert no-panic (not result correctness)
    // since random input is expected to produce Err in almost all cases.
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn suite_from_str_doesnt_panic(s in "\\PC{0,2000}") {
        let _ = suite_from_str(&s);
    }

    #[test]
    fn xml_like_suite_doesnt_panic(
        s in prop::string::string_regex(r#"<suite( xmlns="[a-z:/.]{0,40}")?>(<[a-z]{1,10}>[^<]{0,50}</[a-z]{1,10}>){0,8}</suite>"#).unwrap()
    ) {
        let _ = suite_from_xml(&s);
    }

    #[test]
    fn parse_document_doesnt_panic(s in "\\PC{0,2000}") {
        let _ = parse_document(&s, 0);
    }

    #[test]
    fn xpath_parse_doesnt_panic(s in "[/a-z:@*.\\[\\]()='0-9 |,-]{0,80}") {
        let _ = XPath::parse(&s);
    }

    #[test]
    fn json_path_parse_doesnt_panic(s in "[.a-z\\[\\]0-9\"-]{0,60}") {
        let _ = JsonPath::parse(&s);
    }

    #[test]
    fn unknown_environment_never_panics(env in "[a-z]{1,12}") {
        let suite = mdqa::Suite::new("s", "p").with_check(mdqa::Check::new("c").environment(env).code("TRUE"));
        let engine = mdqa::Engine::new(mdqa::EngineConfig::builder().parallel(false).build()).unwrap();
        let run = engine.run_suite(&suite, "<eml/>", &mdqa::RunContext::new("obj")).unwrap();
        prop_assert_eq!(run.len(), 1);
    }
}

#![no_main]
use libfuzzer_sys::fuzz_target;
use mdqa::document::{Query, XPath};
use mdqa::model::SelectorSyntax;

const DOCUMENT: &str = "<eml:eml xmlns:eml=\"https://eml.ecoinformatics.org/eml-2.2.0\">\
    <dataset><title>Lake chemistry</title><creator id=\"a\"><surName>Jones</surName></creator>\
    <dataTable><entityName>t.csv</entityName></dataTable></dataset></eml:eml>";

/// Fuzz XPath parsing, then evaluate whatever parses against a small EML
/// document.
fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if XPath::parse(s).is_ok() {
            if let Ok(doc) = mdqa::parse_document(DOCUMENT, 0) {
                let query = Query::new(SelectorSyntax::XPath, s);
                let _ = doc.select(&query, None);
            }
        }
    }
});

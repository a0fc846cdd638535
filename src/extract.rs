//! Selector extraction: turning a check's selectors into named bindings.

use crate::document::{Document, Item, Query};
use crate::error::EvaluationErrorKind;
use crate::model::{Bindings, Dialect, Namespace, Selector, Value};

/// Evaluate every selector against `document`.
///
/// Zero matches bind null, one match binds a scalar and several bind a list.
/// A sub-selector always yields a list with one element per outer match.
/// Selectors written for the other document kind produce no binding.
pub fn extract(
    document: &dyn Document,
    selectors: &[Selector],
    suite_namespaces: &[Namespace],
) -> Result<Bindings, EvaluationErrorKind> {
    let native = document.kind().native_syntax();
    let mut bindings = Bindings::with_capacity(selectors.len());

    for selector in selectors {
        let Some((syntax, _)) = selector.path() else {
            return Err(EvaluationErrorKind::Selector {
                selector: selector.name.clone(),
                message: "selector has no expression".to_string(),
            });
        };
        if syntax != native {
            tracing::debug!(
                selector = %selector.name,
                syntax = syntax.as_str(),
                "skipping selector for other document kind"
            );
            continue;
        }
        let value = select_value(document, selector, suite_namespaces, None)?;
        tracing::trace!(selector = %selector.name, value = %value, "bound selector");
        bindings.insert(selector.name.clone(), value);
    }
    Ok(bindings)
}

fn select_value(
    document: &dyn Document,
    selector: &Selector,
    suite_namespaces: &[Namespace],
    context: Option<&Item>,
) -> Result<Value, EvaluationErrorKind> {
    let (syntax, path) = selector.path().ok_or_else(|| EvaluationErrorKind::Selector {
        selector: selector.name.clone(),
        message: "selector has no expression".to_string(),
    })?;
    let namespaces: Vec<Namespace> = suite_namespaces
        .iter()
        .chain(selector.namespaces.iter())
        .cloned()
        .collect();
    let query = Query {
        syntax,
        path,
        namespaces: &namespaces,
        namespace_aware: selector.namespace_aware,
    };
    let items = document
        .select(&query, context)
        .map_err(|message| EvaluationErrorKind::Selector {
            selector: selector.name.clone(),
            message,
        })?;

    if let Some(sub) = &selector.sub_selector {
        let values = items
            .iter()
            .map(|item| select_value(document, sub, suite_namespaces, Some(item)))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::List(values));
    }

    Ok(match items.len() {
        0 => Value::Null,
        1 => document.value_of(&items[0]),
        _ => Value::List(items.iter().map(|item| document.value_of(item)).collect()),
    })
}

/// Whether a check restricted to `dialects` applies to `document`.
///
/// A check without dialects applies everywhere; otherwise at least one
/// dialect expression of the document's native syntax must hold.
pub fn dialect_applies(
    document: &dyn Document,
    dialects: &[Dialect],
    suite_namespaces: &[Namespace],
) -> Result<bool, EvaluationErrorKind> {
    if dialects.is_empty() {
        return Ok(true);
    }
    let native = document.kind().native_syntax();
    for dialect in dialects {
        let Some((syntax, path)) = dialect.path() else {
            continue;
        };
        if syntax != native {
            continue;
        }
        let query = Query {
            syntax,
            path,
            namespaces: suite_namespaces,
            namespace_aware: false,
        };
        let holds = document
            .test(&query)
            .map_err(|message| EvaluationErrorKind::Selector {
                selector: format!("dialect {}", dialect.name),
                message,
            })?;
        if holds {
            tracing::debug!(dialect = %dialect.name, "dialect matched");
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;

    const DOC: &str = r#"<eml:eml xmlns:eml="https://eml.ecoinformatics.org/eml-2.2.0">
  <dataset>
    <title>Arctic lake chemistry</title>
    <creator><surName>Jones</surName><givenName>Ann</givenName><givenName>B</givenName></creator>
    <creator><surName>Smith</surName></creator>
    <dataTable><entityName>chem.csv</entityName></dataTable>
    <numberOfRecords>007</numberOfRecords>
  </dataset>
</eml:eml>"#;

    #[test]
    fn test_cardinality() {
        let doc = parse_document(DOC, 0).expect("doc");
        let selectors = vec![
            Selector::xpath("title", "//dataset/title"),
            Selector::xpath("surNames", "//creator/surName"),
            Selector::xpath("missing", "//dataset/abstract"),
            Selector::xpath("entityCount", "count(//dataTable | //otherEntity)"),
            Selector::xpath("records", "//numberOfRecords"),
        ];
        let bindings = extract(doc.as_ref(), &selectors, &[]).expect("extract");
        assert_eq!(bindings["title"], Value::from("Arctic lake chemistry"));
        assert_eq!(
            bindings["surNames"],
            Value::List(vec![Value::from("Jones"), Value::from("Smith")])
        );
        assert_eq!(bindings["missing"], Value::Null);
        assert_eq!(bindings["entityCount"], Value::Number(1.0));
        assert_eq!(bindings["records"], Value::from("007"));
        let names: Vec<&String> = bindings.keys().collect();
        assert_eq!(names, vec!["title", "surNames", "missing", "entityCount", "records"]);
    }

    #[test]
    fn test_sub_selector_yields_list_per_match() {
        let doc = parse_document(DOC, 0).expect("doc");
        let selector = Selector::xpath("creators", "//creator")
            .with_sub_selector(Selector::xpath("given", "givenName"));
        let bindings = extract(doc.as_ref(), &[selector], &[]).expect("extract");
        assert_eq!(
            bindings["creators"],
            Value::List(vec![
                Value::List(vec![Value::from("Ann"), Value::from("B")]),
                Value::Null,
            ])
        );
    }

    #[test]
    fn test_malformed_expression_is_selector_error() {
        let doc = parse_document(DOC, 0).expect("doc");
        let err = extract(doc.as_ref(), &[Selector::xpath("bad", "//[")], &[]).unwrap_err();
        assert!(matches!(err, EvaluationErrorKind::Selector { ref selector, .. } if selector == "bad"));
    }

    #[test]
    fn test_json_selectors_skipped_on_xml() {
        let doc = parse_document(DOC, 0).expect("doc");
        let selectors = vec![
            Selector::json_path("name", ".name"),
            Selector::xpath("title", "//title"),
        ];
        let bindings = extract(doc.as_ref(), &selectors, &[]).expect("extract");
        assert!(!bindings.contains_key("name"));
        assert!(bindings.contains_key("title"));
    }

    #[test]
    fn test_suite_namespaces_for_aware_selectors() {
        let doc = parse_document(DOC, 0).expect("doc");
        let mut selector = Selector::xpath("ds", "count(/e:eml/dataset)");
        selector.namespace_aware = true;
        let suite_ns = vec![Namespace::new("e", "https://eml.ecoinformatics.org/eml-2.2.0")];
        let bindings = extract(doc.as_ref(), &[selector], &suite_ns).expect("extract");
        assert_eq!(bindings["ds"], Value::Number(1.0));
    }

    #[test]
    fn test_dialects() {
        let doc = parse_document(DOC, 0).expect("doc");
        assert!(dialect_applies(doc.as_ref(), &[], &[]).expect("empty"));
        let eml = Dialect::xpath("eml", "boolean(/*[local-name() = 'eml'])");
        let iso = Dialect::xpath("iso19115", "boolean(/*[local-name() = 'MD_Metadata'])");
        assert!(dialect_applies(doc.as_ref(), &[iso.clone(), eml], &[]).expect("eml"));
        assert!(!dialect_applies(doc.as_ref(), &[iso], &[]).expect("iso"));
    }
}

//! XML writers for suites and runs.

use super::{SerializeError, SuiteVersion};
use crate::model::{Check, CheckResult, Dialect, Namespace, Run, Selector, Suite, Sysmeta};
use chrono::SecondsFormat;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

type Result<T> = std::result::Result<T, SerializeError>;

const ROOT_PREFIX: &str = "mdq";

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Result<Self> {
        let mut out = Self {
            writer: Writer::new(Vec::new()),
        };
        out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(out)
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| SerializeError::Xml(e.to_string()))
    }

    fn root(&mut self, local: &str) -> Result<String> {
        let name = format!("{ROOT_PREFIX}:{local}");
        let mut start = BytesStart::new(name.as_str());
        if let Some(namespace) = SuiteVersion::CURRENT.namespace() {
            start.push_attribute((format!("xmlns:{ROOT_PREFIX}").as_str(), namespace.as_str()));
        }
        self.event(Event::Start(start))?;
        Ok(name)
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, name: &str, value: &str) -> Result<()> {
        self.start(name)?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.end(name)
    }

    fn opt_text(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(v) => self.text(name, v),
            None => Ok(()),
        }
    }

    /// Literal text as CDATA. A `]]>` inside the value is split across two
    /// adjacent sections.
    fn literal(&mut self, value: &str) -> Result<()> {
        let mut pieces = value.split("]]>").peekable();
        let mut lead = "";
        while let Some(piece) = pieces.next() {
            let tail = if pieces.peek().is_some() { "]]" } else { "" };
            let section = format!("{lead}{piece}{tail}");
            self.event(Event::CData(BytesCData::new(section.as_str())))?;
            lead = ">";
        }
        Ok(())
    }

    fn cdata(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        self.start(name)?;
        self.literal(value)?;
        self.end(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| SerializeError::Xml(e.to_string()))
    }
}

fn namespaces(out: &mut XmlOut, namespaces: &[Namespace]) -> Result<()> {
    if namespaces.is_empty() {
        return Ok(());
    }
    out.start("namespaces")?;
    for ns in namespaces {
        let mut start = BytesStart::new("namespace");
        start.push_attribute(("prefix", ns.prefix.as_str()));
        out.event(Event::Start(start))?;
        out.event(Event::Text(BytesText::new(&ns.uri)))?;
        out.end("namespace")?;
    }
    out.end("namespaces")
}

fn expression(out: &mut XmlOut, syntax: &str, value: &str) -> Result<()> {
    let mut start = BytesStart::new("expression");
    start.push_attribute(("syntax", syntax));
    out.event(Event::Start(start))?;
    out.event(Event::Text(BytesText::new(value)))?;
    out.end("expression")
}

fn selector(out: &mut XmlOut, element: &str, selector: &Selector) -> Result<()> {
    let mut start = BytesStart::new(element);
    if selector.namespace_aware {
        start.push_attribute(("namespaceAware", "true"));
    }
    out.event(Event::Start(start))?;
    out.text("name", &selector.name)?;
    out.opt_text("xpath", selector.xpath.as_deref())?;
    if let Some(expr) = &selector.expression {
        expression(out, expr.syntax.as_str(), &expr.value)?;
    }
    namespaces(out, &selector.namespaces)?;
    if let Some(sub) = &selector.sub_selector {
        self::selector(out, "subSelector", sub)?;
    }
    out.end(element)
}

fn dialect(out: &mut XmlOut, dialect: &Dialect) -> Result<()> {
    out.start("dialect")?;
    out.text("name", &dialect.name)?;
    out.opt_text("xpath", dialect.xpath.as_deref())?;
    if let Some(expr) = &dialect.expression {
        expression(out, expr.syntax.as_str(), &expr.value)?;
    }
    out.end("dialect")
}

fn check(out: &mut XmlOut, check: &Check) -> Result<()> {
    out.start("check")?;
    out.text("id", &check.id)?;
    out.opt_text("name", check.name.as_deref())?;
    out.cdata("description", check.description.as_deref())?;
    out.opt_text("type", check.check_type.as_deref())?;
    out.opt_text("level", check.level.as_ref().map(|l| l.as_str()))?;
    out.opt_text("environment", check.environment.as_deref())?;
    out.cdata("code", check.code.as_deref())?;
    out.cdata("expected", check.expected.as_deref())?;
    for s in &check.selectors {
        selector(out, "selector", s)?;
    }
    for d in &check.dialects {
        dialect(out, d)?;
    }
    out.end("check")
}

pub(super) fn suite(suite: &Suite) -> Result<String> {
    let mut out = XmlOut::new()?;
    let root = out.root("suite")?;
    out.text("id", &suite.id)?;
    out.text("name", &suite.name)?;
    out.cdata("description", suite.description.as_deref())?;
    namespaces(&mut out, &suite.namespaces)?;
    for c in &suite.checks {
        check(&mut out, c)?;
    }
    out.end(&root)?;
    out.finish()
}

fn result(out: &mut XmlOut, result: &CheckResult) -> Result<()> {
    out.start("result")?;
    out.start("check")?;
    out.text("id", &result.check_id)?;
    out.text("level", result.level.as_str())?;
    out.end("check")?;
    out.text(
        "timestamp",
        &result.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    )?;
    for output in &result.outputs {
        let mut start = BytesStart::new("output");
        if let Some(t) = &output.output_type {
            start.push_attribute(("type", t.as_str()));
        }
        if let Some(id) = &output.identifier {
            start.push_attribute(("identifier", id.as_str()));
        }
        out.event(Event::Start(start))?;
        out.literal(&output.value)?;
        out.end("output")?;
    }
    out.text("status", result.status.as_str())?;
    out.end("result")
}

fn sysmeta(out: &mut XmlOut, sysmeta: &Sysmeta) -> Result<()> {
    out.start("sysmeta")?;
    out.text("originMemberNode", &sysmeta.origin_member_node)?;
    out.text("rightsHolder", &sysmeta.rights_holder)?;
    if !sysmeta.groups.is_empty() {
        out.start("groups")?;
        for group in &sysmeta.groups {
            out.text("group", group)?;
        }
        out.end("groups")?;
    }
    let uploaded = sysmeta
        .date_uploaded
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true));
    out.opt_text("dateUploaded", uploaded.as_deref())?;
    out.text("formatId", &sysmeta.format_id)?;
    out.opt_text("seriesId", sysmeta.series_id.as_deref())?;
    out.end("sysmeta")
}

pub(super) fn run(run: &Run) -> Result<String> {
    let mut out = XmlOut::new()?;
    let root = out.root("run")?;
    out.text("id", &run.id)?;
    out.text(
        "timestamp",
        &run.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    )?;
    out.text("objectIdentifier", &run.object_identifier)?;
    out.text("suiteId", &run.suite_id)?;
    out.text("runStatus", run.run_status.as_str())?;
    out.cdata("errorDescription", run.error_description.as_deref())?;
    if let Some(meta) = &run.sysmeta {
        sysmeta(&mut out, meta)?;
    }
    for r in &run.results {
        result(&mut out, r)?;
    }
    out.end(&root)?;
    out.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Level, Output, Status};

    #[test]
    fn test_code_written_as_cdata() {
        let suite = Suite::new("s", "Quotes").with_check(
            Check::new("c")
                .environment("r")
                .code(r#"status <- if (x < 1 && y == "a") "FAILURE" else "SUCCESS""#),
        );
        let xml = super::suite(&suite).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<mdq:suite xmlns:mdq="https://nceas.ucsb.edu/mdqe/v1.2">"#));
        assert!(xml.contains(r#"<code><![CDATA[status <- if (x < 1 && y == "a") "FAILURE" else "SUCCESS"]]></code>"#));
    }

    #[test]
    fn test_run_outputs_keep_attributes() {
        let mut run = Run::new("doi:10.5063/F1", "suite");
        let mut result = CheckResult::new("check.plot", Level::Info, Status::Success);
        result.outputs.push(Output {
            value: "iVBORw0KGgo=".into(),
            output_type: Some("image/png".into()),
            identifier: Some("plot-1".into()),
        });
        run.results.push(result);
        let xml = super::run(&run).unwrap();
        assert!(xml.contains(r#"<output type="image/png" identifier="plot-1"><![CDATA[iVBORw0KGgo=]]></output>"#));
        assert!(xml.contains("<status>SUCCESS</status>"));
    }

    #[test]
    fn test_cdata_terminator_is_split() {
        let code = "a[b[0]]>1 && s == '&amp;'";
        let suite = Suite::new("s", "t").with_check(Check::new("c").environment("ecma").code(code));
        let xml = super::suite(&suite).unwrap();
        assert!(xml.contains("<code><![CDATA[a[b[0]]]]><![CDATA[>1 && s == '&amp;']]></code>"));
        assert_eq!(
            crate::serialize::suite_from_xml(&xml).unwrap().checks[0].code.as_deref(),
            Some(code)
        );
    }
}

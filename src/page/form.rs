//! Reconstruction of JSF inline-script form submissions.
//!
//! SIGAA rarely uses real hyperlinks. Clickable elements carry an
//! `onclick` handler that submits a hidden form, with some POST parameters
//! present only inside the script text:
//!
//! ```text
//! if (typeof jsfcljs == 'function') { jsfcljs(
//!     document.getElementById('formAcessarTurma'),
//!     {'formAcessarTurma:turma':'formAcessarTurma:turma','idTurma':'90210'},
//!     '');} return false
//! ```
//!
//! Extraction resolves the referenced form in the page, reads its action
//! and DOM inputs, then recovers the script-literal fields by stripping
//! the `if (...)` wrapper and trailing `return false`, swapping quotes and
//! reading the remainder as a JSON object. Script fields override DOM
//! fields on collision; that precedence is a contract, not a detail — the
//! script-only fields are usually the ones selecting which record the
//! submission targets.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use scraper::{ElementRef, Selector};
use serde_json::Value;
use url::Url;

use crate::error::{Result, SigaaError};

use super::Page;

/// The `document.getElementById('...')` reference inside the handler.
#[allow(clippy::expect_used)]
static FORM_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"document\.getElementById\('(\w+)'\)").expect("form id regex is valid")
    // Static pattern, safe to panic
});

/// Strips the `if (...) { jsfcljs(..., {` head and the `}, ...false` tail,
/// leaving only the literal field list between the braces.
#[allow(clippy::expect_used)]
static SCRIPT_WRAPPER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"if[\S\s]*?,\{|\},[\S\s]*?false").expect("script wrapper regex is valid")
    // Static pattern, safe to panic
});

/// A form ready to be submitted: resolved action URL plus POST fields in
/// document order. The remote application is position- and name-sensitive,
/// so the field order must survive into the encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    /// Submission target, already resolved against the page URL.
    pub action: Url,
    /// POST fields, insertion-ordered.
    pub fields: IndexMap<String, String>,
}

impl Form {
    /// Builds a form from a `<form>` element: declared action resolved
    /// against `base`, plus every named `<input>` in document order.
    ///
    /// # Errors
    ///
    /// [`SigaaError::MissingFormAction`] when the element has no action,
    /// [`SigaaError::InvalidUrl`] when the action does not resolve.
    pub(crate) fn from_element(
        element: ElementRef<'_>,
        base: &Url,
        form_name: &str,
    ) -> Result<Self> {
        let Some(action_attr) = element.value().attr("action") else {
            return Err(SigaaError::missing_form_action(form_name, base.as_str()));
        };
        let action = base
            .join(action_attr)
            .map_err(|_| SigaaError::invalid_url(action_attr))?;

        let mut fields = IndexMap::new();
        for input in element.select(&input_selector()) {
            if let Some(name) = input.value().attr("name") {
                let value = input.value().attr("value").unwrap_or_default();
                fields.insert(name.to_string(), value.to_string());
            }
        }
        Ok(Self { action, fields })
    }
}

#[allow(clippy::expect_used)]
fn input_selector() -> Selector {
    Selector::parse("input").expect("input selector is valid") // Static selector, safe to panic
}

/// Extracts the form a JSF onclick handler would submit. See the module
/// docs for the algorithm and the precedence contract.
pub(crate) fn extract_jsf_form(script: &str, page: &Page) -> Result<Form> {
    if !script.contains("getElementById") {
        return Err(SigaaError::malformed_form_script(
            "no form element reference",
            script,
        ));
    }

    let Some(captures) = FORM_ID_PATTERN.captures(script) else {
        return Err(SigaaError::malformed_form_script(
            "form reference has no id",
            script,
        ));
    };
    let form_id = &captures[1];

    let id_selector = Selector::parse(&format!("#{form_id}"))
        .map_err(|_| SigaaError::malformed_form_script("form id is not selectable", script))?;

    let document = page.document();
    let Some(form_element) = document.select(&id_selector).next() else {
        return Err(SigaaError::malformed_form_script(
            format!("page has no element with id '{form_id}'"),
            script,
        ));
    };

    let Some(action_attr) = form_element.value().attr("action") else {
        return Err(SigaaError::missing_form_action(form_id, page.url().as_str()));
    };
    let action = page
        .url()
        .join(action_attr)
        .map_err(|_| SigaaError::invalid_url(action_attr))?;

    // DOM fields first, in document order; submit buttons never post.
    let mut fields = IndexMap::new();
    for input in form_element.select(&input_selector()) {
        if input.value().attr("type") == Some("submit") {
            continue;
        }
        if let Some(name) = input.value().attr("name") {
            let value = input.value().attr("value").unwrap_or_default();
            fields.insert(name.to_string(), value.to_string());
        }
    }

    // Script-literal fields second: same-named keys keep their DOM
    // position but take the script's value.
    for (name, value) in parse_script_fields(script)? {
        fields.insert(name, value);
    }

    Ok(Form { action, fields })
}

/// Recovers the object-literal fields embedded in the handler text.
///
/// Best-effort text surgery against an uncontrolled remote format: strip
/// the wrapper, turn the single-quoted literal into JSON and parse. Any
/// shape this does not fit is reported, never guessed at.
fn parse_script_fields(script: &str) -> Result<IndexMap<String, String>> {
    let stripped = SCRIPT_WRAPPER_PATTERN.replace_all(script, "");
    let json_text = format!("{{{}}}", stripped.replace('"', "\\\"").replace('\'', "\""));

    let parsed: serde_json::Map<String, Value> = serde_json::from_str(&json_text)
        .map_err(|_| SigaaError::malformed_form_script("script field literals are not parseable", script))?;

    let mut fields = IndexMap::with_capacity(parsed.len());
    for (name, value) in parsed {
        match value {
            Value::String(text) => {
                fields.insert(name, text);
            }
            other => {
                return Err(SigaaError::malformed_form_script(
                    format!("field '{name}' has a non-string value ({other})"),
                    script,
                ));
            }
        }
    }
    Ok(fields)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::tests::page_with_body;
    use super::*;

    const COURSE_ROW_PAGE: &str = r#"<html><body>
        <form id="formAcessarTurma" name="formAcessarTurma" method="post"
              action="/sigaa/portais/discente/turmas.jsf">
            <input type="hidden" name="formAcessarTurma" value="formAcessarTurma" />
            <input type="hidden" name="javax.faces.ViewState" value="j_id42" />
            <input type="hidden" name="idTurma" value="stale" />
            <input type="submit" name="enviar" value="Enviar" />
        </form>
    </body></html>"#;

    const COURSE_ROW_ONCLICK: &str = "if (typeof jsfcljs == 'function') { jsfcljs(document.getElementById('formAcessarTurma'),{'formAcessarTurma:turma':'formAcessarTurma:turma','idTurma':'90210'},'');} return false";

    #[test]
    fn merges_dom_and_script_fields_with_script_precedence() {
        let page = page_with_body(
            "https://sigaa.ifsc.edu.br/sigaa/portais/discente/discente.jsf",
            COURSE_ROW_PAGE,
        );
        let form = extract_jsf_form(COURSE_ROW_ONCLICK, &page).unwrap();

        assert_eq!(
            form.action.as_str(),
            "https://sigaa.ifsc.edu.br/sigaa/portais/discente/turmas.jsf"
        );
        // Script value wins over the stale DOM value.
        assert_eq!(form.fields.get("idTurma").map(String::as_str), Some("90210"));
        // Script-only field present; submit input absent.
        assert_eq!(
            form.fields.get("formAcessarTurma:turma").map(String::as_str),
            Some("formAcessarTurma:turma")
        );
        assert!(!form.fields.contains_key("enviar"));
        // Document order: DOM fields keep their positions, new script
        // field appends.
        let names: Vec<&str> = form.fields.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            [
                "formAcessarTurma",
                "javax.faces.ViewState",
                "idTurma",
                "formAcessarTurma:turma"
            ]
        );
    }

    #[test]
    fn script_without_element_reference_is_malformed() {
        let page = page_with_body("https://sigaa.unb.br/x.jsf", "<html></html>");
        let err = extract_jsf_form("window.open('/help')", &page).unwrap_err();
        assert!(matches!(err, SigaaError::MalformedFormScript { .. }));
    }

    #[test]
    fn unresolvable_form_id_is_malformed() {
        let page = page_with_body("https://sigaa.unb.br/x.jsf", "<html><body></body></html>");
        let err = extract_jsf_form(COURSE_ROW_ONCLICK, &page).unwrap_err();
        assert!(matches!(err, SigaaError::MalformedFormScript { .. }));
    }

    #[test]
    fn form_without_action_is_reported() {
        let page = page_with_body(
            "https://sigaa.unb.br/x.jsf",
            r#"<form id="formAcessarTurma"><input name="a" value="1"/></form>"#,
        );
        let err = extract_jsf_form(COURSE_ROW_ONCLICK, &page).unwrap_err();
        assert!(matches!(err, SigaaError::MissingFormAction { .. }));
    }

    #[test]
    fn non_string_script_literal_is_malformed() {
        let page = page_with_body(
            "https://sigaa.unb.br/x.jsf",
            r#"<form id="f" action="/go"></form>"#,
        );
        let script =
            "if (typeof jsfcljs == 'function') { jsfcljs(document.getElementById('f'),{'n':1},'');} return false";
        let err = extract_jsf_form(script, &page).unwrap_err();
        assert!(matches!(err, SigaaError::MalformedFormScript { .. }));
    }

    #[test]
    fn action_resolves_relative_to_the_page_url() {
        let page = page_with_body(
            "https://sigaa.ufpb.br/sigaa/portais/discente/discente.jsf",
            r#"<form id="f" action="ver.jsf"><input name="id" value="7"/></form>"#,
        );
        let script =
            "if (typeof jsfcljs == 'function') { jsfcljs(document.getElementById('f'),{'k':'v'},'');} return false";
        let form = extract_jsf_form(script, &page).unwrap();
        assert_eq!(
            form.action.as_str(),
            "https://sigaa.ufpb.br/sigaa/portais/discente/ver.jsf"
        );
    }

    #[test]
    fn login_form_from_element_collects_all_named_inputs() {
        let page = page_with_body(
            "https://sigaa.unb.br/sigaa/verTelaLogin.do",
            r#"<form name="loginForm" action="/sigaa/logar.do;jsessionid=abc">
                 <input type="text" name="user.login" value="" />
                 <input type="password" name="user.senha" value="" />
                 <input type="hidden" name="entrar" value="Entrar" />
               </form>"#,
        );
        let document = page.document();
        let selector = Selector::parse(r#"form[name="loginForm"]"#).unwrap();
        let element = document.select(&selector).next().unwrap();
        let form = Form::from_element(element, page.url(), "loginForm").unwrap();
        assert_eq!(form.action.as_str(), "https://sigaa.unb.br/sigaa/logar.do;jsessionid=abc");
        let names: Vec<&str> = form.fields.keys().map(String::as_str).collect();
        assert_eq!(names, ["user.login", "user.senha", "entrar"]);
    }
}

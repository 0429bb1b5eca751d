use super::*;

fn template(name: &str, body: &str, variables: &[&str]) -> PromptTemplate {
    PromptTemplate {
        name: name.to_string(),
        system_message: None,
        template: body.to_string(),
        variables: variables.iter().map(|v| (*v).to_string()).collect(),
        temperature: 0.7,
        max_tokens: 1000,
    }
}

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn builtin_templates_all_register() {
    let registry = PromptRegistry::with_builtin_templates().expect("built-ins are well formed");
    assert_eq!(
        registry.names(),
        vec![
            "complaint_response",
            "faq_generator",
            "meta_tags_generator",
            "product_categorization",
            "product_description",
            "support_response",
        ]
    );
    assert!(registry.get("support_response").expect("template exists").declares(CONTEXT_VARIABLE));
    assert!(!registry.get("meta_tags_generator").expect("template exists").declares(CONTEXT_VARIABLE));
}

#[test]
fn register_rejects_undeclared_placeholders() {
    let mut registry = PromptRegistry::new();
    let result = registry.register(template("t", "{a} and {b}", &["a"]));

    match result {
        Err(RagError::TemplateDeclaration {
            template,
            undeclared,
            unused,
        }) => {
            assert_eq!(template, "t");
            assert_eq!(undeclared, vec!["b".to_string()]);
            assert!(unused.is_empty());
        }
        other => panic!("expected declaration mismatch, got {other:?}"),
    }
}

#[test]
fn register_rejects_unused_declared_variables() {
    let mut registry = PromptRegistry::new();
    let result = registry.register(template("t", "only {a}", &["a", "b", "c"]));

    match result {
        Err(RagError::TemplateDeclaration {
            undeclared, unused, ..
        }) => {
            assert!(undeclared.is_empty());
            assert_eq!(unused, vec!["b".to_string(), "c".to_string()]);
        }
        other => panic!("expected declaration mismatch, got {other:?}"),
    }
}

#[test]
fn system_message_placeholders_count_as_present() {
    let mut registry = PromptRegistry::new();
    let mut t = template("t", "body {a}", &["a", "persona"]);
    t.system_message = Some("You are {persona}.".to_string());
    registry.register(t).expect("declaration is symmetric");

    let rendered = registry
        .render("t", &vars(&[("a", "x"), ("persona", "a judge")]))
        .expect("can render");
    assert_eq!(rendered.system.as_deref(), Some("You are a judge."));
    assert_eq!(rendered.user, "body x");
}

#[test]
fn render_names_every_missing_variable() {
    let mut registry = PromptRegistry::new();
    registry
        .register(template("x", "{a} {b}", &["a", "b"]))
        .expect("can register");

    let result = registry.render("x", &HashMap::new());

    match result {
        Err(RagError::MissingVariables { template, missing }) => {
            assert_eq!(template, "x");
            assert_eq!(missing, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected missing variables, got {other:?}"),
    }
}

#[test]
fn render_ignores_extra_variables() {
    let mut registry = PromptRegistry::new();
    registry
        .register(template("x", "{a} {b}", &["a", "b"]))
        .expect("can register");

    let rendered = registry
        .render("x", &vars(&[("a", "1"), ("b", "2"), ("c", "3")]))
        .expect("extras are not an error");
    assert_eq!(rendered.user, "1 2");
}

#[test]
fn doubled_braces_render_as_literals() {
    let mut registry = PromptRegistry::new();
    registry
        .register(template("json", "{{\"value\": \"{a}\"}}", &["a"]))
        .expect("escaped braces are not placeholders");

    let rendered = registry
        .render("json", &vars(&[("a", "42")]))
        .expect("can render");
    assert_eq!(rendered.user, "{\"value\": \"42\"}");
}

#[test]
fn unknown_template_is_reported_by_name() {
    let registry = PromptRegistry::new();
    let result = registry.render("nope", &HashMap::new());
    assert!(matches!(result, Err(RagError::UnknownTemplate(name)) if name == "nope"));
}

#[test]
fn out_of_range_sampling_settings_are_rejected() {
    let mut registry = PromptRegistry::new();

    let mut too_hot = template("t", "{a}", &["a"]);
    too_hot.temperature = 1.5;
    assert!(matches!(
        registry.register(too_hot),
        Err(RagError::Validation(_))
    ));

    let mut too_long = template("t", "{a}", &["a"]);
    too_long.max_tokens = 50_000;
    assert!(matches!(
        registry.register(too_long),
        Err(RagError::Validation(_))
    ));
}

#[test]
fn context_slot_renders_marker_when_bound_to_it() {
    let mut registry = PromptRegistry::new();
    registry
        .register(template("grounded", "Answer using:\n{context}", &["context"]))
        .expect("can register");

    let rendered = registry
        .render(
            "grounded",
            &vars(&[(CONTEXT_VARIABLE, EMPTY_CONTEXT_MARKER)]),
        )
        .expect("can render");
    assert!(rendered.user.contains(EMPTY_CONTEXT_MARKER));
}

#[test]
fn removed_templates_are_forgotten() {
    let mut registry = PromptRegistry::with_builtin_templates().expect("built-ins register");
    assert!(registry.remove("faq_generator").is_some());
    assert!(matches!(
        registry.render("faq_generator", &HashMap::new()),
        Err(RagError::UnknownTemplate(_))
    ));
}

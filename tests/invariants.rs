//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use minijinja::Value;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use viewsmith_core::formatters::escape_html;
use viewsmith_core::{
    build_catalog, CatalogHandle, FormatterRegistry, MemoryDiscovery, ResponseDispatcher,
    TemplateComposer, TemplateSet, TemplateSetCompiler, TemplateSource, ViewConfig, ViewError,
};

fn frozen_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap()
}

fn frozen_registry() -> Arc<FormatterRegistry> {
    Arc::new(FormatterRegistry::build_with("America/New_York", frozen_now))
}

fn write(root: &Path, relative: &str, markup: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, markup).unwrap();
}

/// views/master.html plus two pages with markup unique to each
fn create_views() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "views/master.html",
        "<html><title>{% block title %}Site{% endblock %}</title><body>{% block content %}{% endblock %}</body></html>",
    );
    write(
        root,
        "views/public/alpha.html",
        "{% extends \"master.html\" %}{% block title %}Alpha{% endblock %}\
         {% block content %}<p>ALPHA-ONLY {{ name|toTitleCase }}</p>{% endblock %}",
    );
    write(
        root,
        "views/public/beta.html",
        "{% extends \"master.html\" %}{% block content %}<p>BETA-ONLY {{ int64Display2(amount) }}</p>{% endblock %}",
    );
    write(
        root,
        "views/public/stamp.html",
        "{% extends \"master.html\" %}{% block content %}\
         {{ displayDate(updated) }} {% if isToday(updated) %}today{% endif %}{% endblock %}",
    );
    dir
}

fn path(dir: &TempDir, relative: &str) -> String {
    dir.path().join(relative).to_string_lossy().into_owned()
}

#[test]
fn test_compose_with_layout_is_idempotent() {
    let views = create_views();
    let composer = TemplateComposer::with_registry(frozen_registry());
    let fragments = [TemplateSource::file(path(&views, "views/public/stamp.html"))];
    let model = json!({"updated": "2024-03-15T12:00:00Z"});

    let first = composer
        .compose_with_layout(path(&views, "views/master.html"), &model, &fragments)
        .unwrap();
    let second = composer
        .compose_with_layout(path(&views, "views/master.html"), &model, &fragments)
        .unwrap();

    assert_eq!(first.as_str(), second.as_str());
    assert_eq!(
        first.as_str(),
        "<html><title>Site</title><body>03/15/2024 today</body></html>"
    );
}

#[test]
fn test_direct_and_template_invocation_agree() {
    let registry = frozen_registry();
    let composer = TemplateComposer::with_registry(Arc::clone(&registry));

    let cases: Vec<(&str, Vec<serde_json::Value>)> = vec![
        ("formatPhone", vec![json!("2125551234")]),
        ("formatPhone", vec![json!("555-1234")]),
        ("int64Display2", vec![json!(123456)]),
        ("int64Display0", vec![json!(98765432)]),
        ("decimalDisplay3", vec![json!("1234.5675")]),
        ("intDisplay0", vec![json!(1234567)]),
        ("zeroPad", vec![json!(7)]),
        ("plusOneZeroPad", vec![json!(8)]),
        ("add", vec![json!(2), json!(40)]),
        ("calcTabIndex", vec![json!(2), json!(1), json!(10)]),
        ("firstInitial", vec![json!("mary")]),
        ("toTitleCase", vec![json!("hello big world")]),
        ("toTitleCase", vec![json!("o'neil")]),
        ("toUppercase", vec![json!("<b>")]),
        ("newLineToBR", vec![json!("one\ntwo & three")]),
        ("marshal", vec![json!({"z": 1, "a": "</script>"})]),
        ("arrayToQS", vec![json!("id"), json!(["1", "2"])]),
        ("displayDate", vec![json!("2024-03-15T03:00:00Z")]),
        ("dateTimeFormal", vec![json!(1710513000)]),
        ("formatDate", vec![json!("2024-03-15T03:00:00Z"), json!("UTC"), json!("%Y/%m/%d")]),
        ("isToday", vec![json!("2024-03-15T20:00:00Z")]),
        ("whenCompletedDisplay", vec![json!(null)]),
    ];

    for (name, args) in cases {
        assert!(registry.contains(name), "{} is not registered", name);
        let values: Vec<Value> = args.iter().map(Value::from_serialize).collect();
        let direct = registry.invoke(name, &values).unwrap();
        let raw = direct.to_string();
        let expected = if direct.is_safe() { raw.clone() } else { escape_html(&raw) };
        if !raw.contains(['&', '<', '>', '"', '\'']) {
            assert_eq!(expected, raw, "{} output needs no escaping", name);
        }

        let params: Vec<String> = (0..args.len()).map(|i| format!("a{}", i)).collect();
        let model: serde_json::Map<String, serde_json::Value> =
            params.iter().cloned().zip(args.iter().cloned()).collect();

        let call = format!("{{{{ {}({}) }}}}", name, params.join(", "));
        let as_function = composer.compose_from_string(&call, &model).unwrap();
        assert_eq!(as_function.as_str(), expected, "function form of {}", name);

        let rest: Vec<&str> = params[1..].iter().map(String::as_str).collect();
        let pipe = if rest.is_empty() {
            format!("{{{{ a0|{} }}}}", name)
        } else {
            format!("{{{{ a0|{}({}) }}}}", name, rest.join(", "))
        };
        let as_filter = composer.compose_from_string(&pipe, &model).unwrap();
        assert_eq!(as_filter.as_str(), expected, "filter form of {}", name);
    }
}

#[test]
fn test_compose_fragment_without_sources_is_invalid_argument() {
    let composer = TemplateComposer::with_registry(frozen_registry());
    let err = composer.compose_fragment(&json!({}), &[]).unwrap_err();
    assert!(matches!(err, ViewError::InvalidArgument(_)));
    assert!(!err.is_compile_time());
}

#[test]
fn test_missing_catalog_key_regardless_of_size() {
    let compiler = TemplateSetCompiler::new(frozen_registry());
    let layout = TemplateSource::inline("master.html", "{% block content %}{% endblock %}");

    for size in [0usize, 1, 7] {
        let sets: Vec<TemplateSet> = (0..size)
            .map(|i| {
                TemplateSet::new(
                    format!("page{}", i),
                    [TemplateSource::inline(format!("page{}.html", i), "{% extends \"master.html\" %}")],
                )
            })
            .collect();
        let catalog = compiler.compile_sets(&layout, &sets).unwrap();
        assert_eq!(catalog.len(), size);

        let composer = TemplateComposer::new(TemplateSetCompiler::new(frozen_registry()));
        let err = composer.compose_from_catalog(&catalog, "absent", &json!({})).unwrap_err();
        assert!(matches!(err, ViewError::TemplateNotFound(ref key) if key == "absent"));
    }
}

#[test]
fn test_fixed_point_scenario() {
    let composer = TemplateComposer::with_registry(frozen_registry());
    let out = composer
        .compose_from_string("{{ int64Display2(123456) }}|{{ big|int64Display2 }}", &json!({"big": 1234567890}))
        .unwrap();
    assert_eq!(out.as_str(), "12.35|123,456.79");
}

#[test]
fn test_phone_scenario() {
    let composer = TemplateComposer::with_registry(frozen_registry());
    let out = composer
        .compose_from_string(
            "{{ formatPhone(a) }};{{ formatPhone(b) }}",
            &json!({"a": "2125551234", "b": "12125551234"}),
        )
        .unwrap();
    assert_eq!(out.as_str(), "(212) 555-1234;12125551234");
}

#[test]
fn test_redirect_scenario() {
    let response = ResponseDispatcher::default().report_redirect("/dashboard").unwrap();
    assert_eq!(
        String::from_utf8(response.into_body()).unwrap(),
        r#"{"statusCode":6,"redirectTo":"/dashboard"}"#
    );
}

#[test]
fn test_sets_are_isolated() {
    let views = create_views();
    let config = ViewConfig::from_toml_str(&format!(
        r#"
        layout = "{layout}"
        display_timezone = "UTC"

        [[sets]]
        key = "a"
        templates = ["{alpha}"]

        [[sets]]
        key = "b"
        templates = ["{beta}"]
        "#,
        layout = path(&views, "views/master.html"),
        alpha = path(&views, "views/public/alpha.html"),
        beta = path(&views, "views/public/beta.html"),
    ))
    .unwrap();

    let catalog = build_catalog(&config, frozen_registry()).unwrap();
    let model = json!({"name": "ada lovelace", "amount": 123456});

    let a = catalog.render("a", &model).unwrap();
    assert_eq!(
        a.as_str(),
        "<html><title>Alpha</title><body><p>ALPHA-ONLY Ada Lovelace</p></body></html>"
    );
    assert!(!a.as_str().contains("BETA-ONLY"));

    let b = catalog.render("b", &model).unwrap();
    assert!(b.as_str().contains("BETA-ONLY 12.35"));
    assert!(!b.as_str().contains("ALPHA-ONLY"));
    assert!(b.as_str().contains("<title>Site</title>"));

    assert_ne!(
        catalog.get("a").unwrap().fingerprint(),
        catalog.get("b").unwrap().fingerprint()
    );
}

#[test]
fn test_macro_in_one_set_is_invisible_to_another() {
    let compiler = TemplateSetCompiler::new(frozen_registry());
    let layout = TemplateSource::inline("master.html", "{% block content %}{% endblock %}");
    let sets = vec![
        TemplateSet::new(
            "defines",
            [TemplateSource::inline(
                "defines.html",
                "{% extends \"master.html\" %}{% block content %}\
                 {% macro badge(x) %}[{{ x }}]{% endmacro %}{{ badge(1) }}{% endblock %}",
            )],
        ),
        TemplateSet::new(
            "borrows",
            [TemplateSource::inline(
                "borrows.html",
                "{% extends \"master.html\" %}{% block content %}{{ badge(2) }}{% endblock %}",
            )],
        ),
    ];

    let err = compiler.compile_sets(&layout, &sets).unwrap_err();
    assert!(matches!(err, ViewError::TemplateSyntax { ref source_name, .. } if source_name == "borrows.html"));

    let catalog = compiler.compile_sets(&layout, &sets[..1]).unwrap();
    assert_eq!(catalog.render("defines", &json!({})).unwrap().as_str(), "[1]");
}

#[test]
fn test_compile_tree_keys_by_relative_path() {
    let views = create_views();
    let compiler = TemplateSetCompiler::new(frozen_registry());
    let catalog = compiler.compile_tree(&views.path().join("views")).unwrap();

    let keys: Vec<_> = catalog.keys().collect();
    assert_eq!(
        keys,
        vec!["master.html", "public/alpha.html", "public/beta.html", "public/stamp.html"]
    );
    let out = catalog.render("public/beta.html", &json!({"amount": 10000})).unwrap();
    assert!(out.as_str().contains("BETA-ONLY 1.00"));
}

#[test]
fn test_compile_tree_rejects_missing_root() {
    let views = create_views();
    let compiler = TemplateSetCompiler::new(frozen_registry());
    let err = compiler.compile_tree(&views.path().join("nowhere")).unwrap_err();
    assert!(matches!(err, ViewError::Discovery { .. }));
    assert!(err.is_compile_time());
}

#[test]
fn test_compile_tree_unreadable_file_is_syntax_error() {
    let views = create_views();
    fs::write(views.path().join("views/public/broken.html"), [0xffu8, 0xfe, 0x3c]).unwrap();
    let compiler = TemplateSetCompiler::new(frozen_registry());

    let err = compiler.compile_tree(&views.path().join("views")).unwrap_err();
    assert!(err.is_compile_time());
    match err {
        ViewError::TemplateSyntax { source_name, .. } => assert!(source_name.ends_with("broken.html"), "{}", source_name),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_compile_tree_with_memory_discovery() {
    let discovery = MemoryDiscovery::new()
        .with("master.html", "<main>{% block content %}{% endblock %}</main>")
        .with("home.html", "{% extends \"master.html\" %}{% block content %}{{ dashes(3) }}{% endblock %}");
    let compiler = TemplateSetCompiler::new(frozen_registry()).with_discovery(discovery);
    let catalog = compiler.compile_tree(Path::new("unused")).unwrap();
    let out = catalog.render("home.html", &json!({})).unwrap();
    assert_eq!(out.as_str(), "<main>\u{2014}\u{2014}</main>");
}

#[test]
fn test_unreadable_fragment_aborts_catalog() {
    let views = create_views();
    let compiler = TemplateSetCompiler::new(frozen_registry());
    let layout = TemplateSource::file(path(&views, "views/master.html"));
    let sets = vec![
        TemplateSet::new("a", [path(&views, "views/public/alpha.html")]),
        TemplateSet::new("gone", [path(&views, "views/public/deleted.html")]),
    ];
    let err = compiler.compile_sets(&layout, &sets).unwrap_err();
    assert!(matches!(err, ViewError::TemplateSyntax { .. }));
}

#[test]
fn test_readers_see_whole_catalogs_during_reload() {
    let compiler = TemplateSetCompiler::new(frozen_registry());
    let layout = TemplateSource::inline("master.html", "{% block content %}{% endblock %}");
    let version = |v: &str| {
        vec![
            TemplateSet::new(
                "one",
                [TemplateSource::inline("one.html", format!("{{% extends \"master.html\" %}}{{% block content %}}{}{{% endblock %}}", v))],
            ),
            TemplateSet::new(
                "two",
                [TemplateSource::inline("two.html", format!("{{% extends \"master.html\" %}}{{% block content %}}{}{{% endblock %}}", v))],
            ),
        ]
    };
    let handle = CatalogHandle::new(compiler.compile_sets(&layout, &version("v1")).unwrap());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let catalog = handle.current();
                    let one = catalog.render("one", &json!({})).unwrap();
                    let two = catalog.render("two", &json!({})).unwrap();
                    assert_eq!(one.as_str(), two.as_str());
                }
            });
        }
        for v in ["v2", "v3", "v4"] {
            handle.reload(|| compiler.compile_sets(&layout, &version(v))).unwrap();
        }
    });

    assert_eq!(handle.current().render("one", &json!({})).unwrap().as_str(), "v4");
}

#[test]
fn test_unknown_timezone_degrades_to_utc() {
    let registry = Arc::new(FormatterRegistry::build_with_timezone("Not/AZone"));
    assert!(registry.timezone_fell_back());
    let composer = TemplateComposer::with_registry(registry);
    let out = composer
        .compose_from_string("{{ fullDateTimeET(t) }}", &json!({"t": "2024-03-15T03:00:00Z"}))
        .unwrap();
    assert_eq!(out.as_str(), "2024-03-15 03:00");
}

use std::collections::BTreeMap;

use rstest::rstest;
use scaffold_compiler::{compile, compile_file, CompileError, CompileOptions};
use scaffold_core::config::Config;
use scaffold_core::types::{DiagnosticCode, MutationOp, Permissions, Severity};
use serde_json::json;
use tempfile::TempDir;

fn paths(source: &str) -> Vec<String> {
    compile(source, &CompileOptions::default())
        .entries
        .into_iter()
        .map(|e| e.path)
        .collect()
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

#[test]
fn flat_and_nested_declarations_agree() {
    let flat = compile(
        "src/\nsrc/main.py :: \"print(1)\"\n",
        &CompileOptions::default(),
    );
    let nested = compile(
        "src/\n    main.py :: \"print(1)\"\n",
        &CompileOptions::default(),
    );
    assert!(flat.diagnostics.is_empty(), "{:?}", flat.diagnostics);
    assert_eq!(flat.entries, nested.entries);
    assert_eq!(flat.entries[1].path, "src/main.py");
    assert_eq!(flat.entries[1].content.as_deref(), Some("print(1)"));
}

#[test]
fn tree_glyphs_are_ignored() {
    let source = "app/\n├── api.py\n└── models/\n    └── user.py\n";
    assert_eq!(
        paths(source),
        vec!["app", "app/api.py", "app/models", "app/models/user.py"]
    );
}

#[test]
fn permissions_and_seeds_survive_compilation() {
    let compiled = compile(
        "bin/\n    run.sh :: \"#!/bin/sh\" %% executable\nnew.py << templates/base.py\n",
        &CompileOptions::default(),
    );
    assert!(compiled.diagnostics.is_empty(), "{:?}", compiled.diagnostics);
    assert_eq!(compiled.entries[1].permissions, Some(Permissions(0o755)));
    assert_eq!(compiled.entries[2].seed.as_deref(), Some("templates/base.py"));
}

#[test]
fn mutations_carry_their_fragment() {
    let compiled = compile(
        ".gitignore += \"target/\"\n",
        &CompileOptions::default(),
    );
    let entry = &compiled.entries[0];
    assert_eq!(entry.mutation, MutationOp::Append);
    assert_eq!(entry.content.as_deref(), Some("target/"));
}

// ---------------------------------------------------------------------------
// Logic
// ---------------------------------------------------------------------------

#[rstest]
#[case::indented("@if docker\n    Dockerfile\n@else\n    Procfile\n@endif\n")]
#[case::flat("@if docker\nDockerfile\n@else\nProcfile\n@endif\n")]
#[case::inline("@if docker -> Dockerfile\n@if not docker -> Procfile\n")]
fn conditional_layouts_are_equivalent(#[case] source: &str) {
    let mut options = CompileOptions::default();
    options.overrides.insert("docker".into(), json!(true));
    let on = compile(source, &options);
    assert!(on.diagnostics.is_empty(), "{:?}", on.diagnostics);
    assert_eq!(on.entries.len(), 1);
    assert_eq!(on.entries[0].path, "Dockerfile");

    options.overrides.insert("docker".into(), json!(false));
    let off = compile(source, &options);
    assert_eq!(off.entries.len(), 1);
    assert_eq!(off.entries[0].path, "Procfile");
}

#[test]
fn hidden_branch_hides_its_whole_subtree() {
    let source = "$$ tests = false\n@if tests\n    tests/\n        unit/\n            test_a.py\n        conftest.py\n@endif\nsrc/\n";
    assert_eq!(paths(source), vec!["src"]);
}

#[test]
fn nested_conditions_inside_directories() {
    let source = "\
$$ db = postgres
app/
    @if db == \"postgres\"
        db/
            schema.sql
    @elif db == \"sqlite\"
        app.db
    @endif
    main.py
";
    assert_eq!(
        paths(source),
        vec!["app", "app/db", "app/db/schema.sql", "app/main.py"]
    );
}

#[test]
fn loops_expand_in_document_order() {
    let source = "\
$$ services = [auth, billing]
services/
    @for name in services
        {{ name }}/
            handler.py :: \"SERVICE = '{{ name }}'\"
    @endfor
";
    let compiled = compile(source, &CompileOptions::default());
    let p: Vec<&str> = compiled.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        p,
        vec![
            "services",
            "services/auth",
            "services/auth/handler.py",
            "services/billing",
            "services/billing/handler.py"
        ]
    );
    assert_eq!(
        compiled.entries[4].content.as_deref(),
        Some("SERVICE = 'billing'")
    );
}

#[test]
fn exists_checks_disk_under_project_root() {
    let root = TempDir::new().expect("root");
    std::fs::write(root.path().join("package.json"), "{}").expect("seed file");
    let mut options = CompileOptions::default();
    options.project_root = Some(root.path().to_path_buf());
    let compiled = compile(
        "@if exists(\"package.json\")\n    .nvmrc :: 20\n@endif\n",
        &options,
    );
    assert_eq!(compiled.entries.len(), 1);
    assert_eq!(compiled.entries[0].path, ".nvmrc");
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[test]
fn diagnostics_are_ordered_by_line_and_compilation_continues() {
    let source = "a.txt\n@endif\n@bogus\nb.txt :: {{ nope }}\n../c.txt\nd.txt\n";
    let compiled = compile(source, &CompileOptions::default());
    let lines: Vec<usize> = compiled.diagnostics.iter().map(|d| d.line).collect();
    assert_eq!(lines, vec![2, 3, 4, 5]);
    assert_eq!(compiled.diagnostics[0].code, DiagnosticCode::OrphanCloser);
    assert_eq!(compiled.diagnostics[1].code, DiagnosticCode::UnknownDirective);
    assert_eq!(compiled.diagnostics[2].code, DiagnosticCode::Template);
    assert_eq!(compiled.diagnostics[3].code, DiagnosticCode::UnsafePath);
    let p: Vec<&str> = compiled.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(p, vec!["a.txt", "b.txt", "d.txt"]);
    assert!(compiled.has_errors());
    assert_eq!(compiled.worst_severity(), Some(Severity::Error));
}

#[test]
fn diagnostic_display_names_line_and_code() {
    let compiled = compile("x\n@endfor\n", &CompileOptions::default());
    assert_eq!(
        compiled.diagnostics[0].to_string(),
        "line 2: error [orphan-closer] @endfor without a matching open block"
    );
}

#[test]
fn warnings_do_not_count_as_errors() {
    let compiled = compile("@warn heads up\nok.txt\n", &CompileOptions::default());
    assert!(!compiled.has_errors());
    assert!(compiled.blocks_at(Severity::Warning));
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[test]
fn config_defaults_sit_below_script_and_overrides() {
    let mut config = Config::default();
    config.variables = BTreeMap::from([
        ("name".to_string(), json!("from-config")),
        ("kind".to_string(), json!("lib")),
        ("extra".to_string(), json!("kept")),
    ]);
    let root = TempDir::new().expect("root");
    let mut options = CompileOptions::from_config(&config, root.path());
    options.overrides.insert("kind".into(), json!("bin"));

    let compiled = compile("$$ name = from-script\n$$ kind = from-script\n", &options);
    assert_eq!(compiled.variables["name"], json!("from-script"));
    assert_eq!(compiled.variables["kind"], json!("bin"));
    assert_eq!(compiled.variables["extra"], json!("kept"));
}

#[test]
fn compile_file_reports_missing_blueprint() {
    let root = TempDir::new().expect("root");
    let missing = root.path().join("nope.scaffold");
    let err = compile_file(&missing, &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, CompileError::Io { .. }));
}

#[test]
fn compile_file_reads_blueprint() {
    let root = TempDir::new().expect("root");
    let file = root.path().join("blueprint.scaffold");
    std::fs::write(&file, "README.md :: hello\n").expect("write blueprint");
    let compiled = compile_file(&file, &CompileOptions::default()).expect("compile");
    assert_eq!(compiled.entries[0].content.as_deref(), Some("hello"));
}

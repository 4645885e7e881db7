use std::path::{Path, PathBuf};

use actions_models::{
    ParseError, Uses, Workflow,
    common::{EnvValue, Permission, PermissionsSpec},
    step::StepBody,
    workflow::{RunsOn, SecretsSpec},
};
use pretty_assertions::assert_eq;

fn sample_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/sample-workflows")
}

fn load_workflow(name: &str) -> Workflow {
    let workflow_path = sample_dir().join(name);
    let contents = std::fs::read_to_string(&workflow_path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", workflow_path.display()));
    Workflow::parse(&contents).unwrap()
}

#[test]
fn test_load_all() {
    for sample in std::fs::read_dir(sample_dir()).unwrap() {
        let sample_path = sample.unwrap().path();
        let sample_name = sample_path.file_name().unwrap().to_str().unwrap();

        let workflow = load_workflow(sample_name);
        if sample_name.contains(".invalid.") {
            assert!(
                !workflow.diagnostics.is_empty(),
                "expected diagnostics for {sample_name}"
            );
        } else {
            assert_eq!(workflow.diagnostics, vec![], "{sample_name}");
        }
    }
}

#[test]
fn test_ci_workflow() {
    let workflow = load_workflow("ci.yml");

    assert_eq!(workflow.name.as_deref(), Some("CI"));
    assert_eq!(
        workflow.on.events().collect::<Vec<_>>(),
        ["push", "pull_request", "workflow_dispatch"]
    );

    let pr = workflow.on.get("pull_request").unwrap();
    assert_eq!(pr.types, ["opened", "synchronize"]);
    assert_eq!(pr.paths_ignore, ["docs/**"]);

    let dispatch = workflow.on.get("workflow_dispatch").unwrap();
    let target = &dispatch.inputs["target"];
    assert!(target.required);
    assert_eq!(target.default.as_deref(), Some("staging"));

    let PermissionsSpec::Scoped(scopes) = &workflow.permissions else {
        panic!("expected scoped permissions");
    };
    assert_eq!(scopes["contents"], Permission::Read);
    assert_eq!(
        workflow.env["CARGO_TERM_COLOR"],
        EnvValue::String("always".into())
    );

    assert_eq!(workflow.jobs.len(), 3);
}

#[test]
fn test_ci_jobs() {
    let workflow = load_workflow("ci.yml");

    let test = workflow.job("test").unwrap();
    assert_eq!(test.line, 24);
    assert_eq!(
        test.runs_on,
        RunsOn::MatrixExpanded {
            expression: "${{ matrix.os }}".into(),
            labels: vec![
                "ubuntu-latest".into(),
                "macos-14".into(),
                "windows-2022".into()
            ],
        }
    );
    assert!(!test.runs_on.is_self_hosted());

    let checkout = &test.steps[0];
    assert_eq!(checkout.line, 33);
    let Some(Uses::Repository(reference)) = checkout.uses() else {
        panic!("expected a repository step");
    };
    assert!(reference.is_hash_pinned());
    assert_eq!(
        checkout.with().unwrap()["persist-credentials"],
        EnvValue::Boolean(false)
    );

    let StepBody::Run { run, shell, .. } = &test.steps[1].body else {
        panic!("expected a run step");
    };
    assert_eq!(run, "cargo test");
    assert_eq!(shell.as_deref(), Some("bash -e {0}"));

    let build = workflow.job("build").unwrap();
    assert_eq!(build.needs, ["test"]);
    assert!(build.runs_on.is_self_hosted());
    let container = build.container.as_ref().unwrap();
    assert_eq!(container.image.as_deref(), Some("ghcr.io/octo/builder:1.0"));
    assert_eq!(
        container.credentials.as_ref().unwrap().username.as_deref(),
        Some("octo")
    );
    assert_eq!(build.services["redis"].image.as_deref(), Some("redis:7"));
    assert_eq!(build.containers().count(), 2);
    assert_eq!(
        build.environment.as_ref().unwrap().name.as_deref(),
        Some("production")
    );
    assert!(matches!(build.steps[0].uses(), Some(Uses::Local(_))));
    assert!(matches!(build.steps[1].uses(), Some(Uses::Docker(_))));

    let call = workflow.job("call").unwrap();
    assert!(call.is_reusable());
    assert_eq!(call.runs_on, RunsOn::Unspecified);
    assert_eq!(call.secrets, Some(SecretsSpec::Inherit));
    let Some(Uses::Repository(reference)) = &call.uses else {
        panic!("expected a reusable workflow call");
    };
    assert!(reference.is_reusable_workflow());
}

#[test]
fn test_merge_keys() {
    let workflow = load_workflow("anchors.yml");

    for job in &workflow.jobs {
        assert_eq!(
            job.runs_on,
            RunsOn::GitHubHosted(vec!["ubuntu-latest".into()])
        );
    }
}

#[test]
fn test_partial_model_on_mismatches() {
    let workflow = load_workflow("mismatches.invalid.yml");

    assert!(workflow.has_trigger("pull_request_target"));
    assert_eq!(workflow.permissions, PermissionsSpec::Default);

    let odd = workflow.job("odd").unwrap();
    assert_eq!(odd.steps.len(), 4);
    assert!(matches!(odd.steps[0].body, StepBody::Invalid));
    assert!(matches!(odd.steps[1].body, StepBody::Invalid));
    assert!(matches!(odd.steps[2].body, StepBody::Invalid));
    assert_eq!(odd.steps[3].run(), Some("echo fine"));

    let messages = workflow
        .diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    assert_eq!(
        messages,
        [
            "permissions: expected a permission set or mapping, found a number",
            "jobs.odd.steps[0]: step has neither `uses` nor `run`",
            "jobs.odd.steps[1].uses: malformed `uses:` reference: expected owner/repo, got `not a reference`",
            "jobs.odd.steps[2]: step has both `uses` and `run`",
            "jobs.no-steps: job has neither `steps` nor `uses`",
        ]
    );
}

#[test]
fn test_fatal_errors() {
    assert!(matches!(
        Workflow::parse("jobs: [unterminated"),
        Err(ParseError::Syntax { .. })
    ));
    assert!(matches!(
        Workflow::parse("just a string"),
        Err(ParseError::NotAMapping { .. })
    ));

    let (workflow, err) = Workflow::parse_lenient("jobs: [unterminated");
    assert!(err.is_some());
    assert!(workflow.jobs.is_empty());
    assert!(workflow.diagnostics.is_empty());
    assert_eq!(workflow.document().source(), "jobs: [unterminated");
}

#[test]
fn test_never_panics_on_garbage() {
    for garbage in [
        "",
        "~",
        ":",
        "- - - -",
        "{{{{",
        "jobs: 1",
        "jobs: {a: 1, b: [1, 2], c: {steps: 3}}",
        "on: {push: 1}\njobs: {a: {runs-on: {group: 1}, steps: [1, null, {uses: 1}]}}",
        "\u{0}\u{1}\u{2}",
    ] {
        let _ = Workflow::parse(garbage);
        let _ = Workflow::parse_lenient(garbage);
    }

    let _ = Workflow::parse_bytes(&[0xff, 0xfe, b'a', b':', b' ', 0x80]);
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use anvil_analysis::{
    AnalysisOptions, CauseKind, ConfiguredTargetValue, ExecGroup, RuleClassBuilder,
};
use anvil_graph::EventKind;

use common::{
    expect_failure, harness_with, label, package, provider_strs, request_ct, rule_target,
    target_config, toolchain_rule, FixtureLoader, FixtureToolchainResolver, RecordingImpl,
};

fn compiled_rule() -> Arc<anvil_analysis::RuleClass> {
    RuleClassBuilder::new(
        "compiled_binary",
        Arc::new(RecordingImpl {
            provider: "DemoInfo".to_owned(),
        }),
    )
    .toolchains(vec![label("//types:compiler")])
    .fragments(&["core", "platform"])
    .build()
    .expect("rule class builds")
}

fn toolchain_fixture(loader: &FixtureLoader) -> (Arc<FixtureToolchainResolver>, anvil_analysis::Label) {
    let tc = label("//tc:gcc");
    loader.put(package(tc.package_id(), vec![rule_target(&tc, &toolchain_rule(), vec![])]));
    let mut map = BTreeMap::new();
    map.insert(label("//types:compiler"), tc.clone());
    (
        Arc::new(FixtureToolchainResolver::new(
            label("//platforms:linux_x86"),
            map,
        )),
        tc,
    )
}

/// Toolchain resolution binds the resolved toolchain as a dependency and
/// records the execution platform per exec group.
#[test]
fn toolchains_are_bound_and_configured() {
    let loader = Arc::new(FixtureLoader::new());
    let (resolver, tc) = toolchain_fixture(&loader);
    let bin = label("//a:bin");
    loader.put(package(
        bin.package_id(),
        vec![rule_target(&bin, &compiled_rule(), vec![])],
    ));
    let mut h = harness_with(
        loader,
        resolver,
        Vec::new(),
        AnalysisOptions {
            store_transitive_packages: true,
            ..AnalysisOptions::default()
        },
    );
    let cfg = target_config(&h, "fastbuild");

    let value = request_ct(&mut h, &bin, Some(cfg)).expect("analyzes");
    let toolchains = provider_strs(&value, "DemoInfo", "toolchains");
    assert_eq!(toolchains, vec![tc.to_string()]);

    let ConfiguredTargetValue::Rule(rule_ct) = value.as_ref() else {
        panic!("expected rule value");
    };
    assert_eq!(
        rule_ct.exec_group_bindings.get("default"),
        Some(&label("//platforms:linux_x86"))
    );
    // The toolchain target's package was transitively read.
    let packages = rule_ct
        .transitive_packages
        .as_ref()
        .expect("tracking on")
        .to_vec();
    assert!(packages.contains(&tc.package_id()));
}

/// The resolver reporting no matching platform becomes a
/// `NoMatchingExecutionPlatform` failure.
#[test]
fn no_matching_platform_fails() {
    let loader = Arc::new(FixtureLoader::new());
    let bin = label("//a:bin");
    loader.put(package(
        bin.package_id(),
        vec![rule_target(&bin, &compiled_rule(), vec![])],
    ));
    let mut h = harness_with(
        loader,
        Arc::new(FixtureToolchainResolver::failing(
            "no platform satisfies //constraints:gpu",
        )),
        Vec::new(),
        AnalysisOptions::default(),
    );
    let cfg = target_config(&h, "fastbuild");

    let error = expect_failure(request_ct(&mut h, &bin, Some(cfg)));
    assert!(
        error.message().contains("no matching execution platform"),
        "{}",
        error.message()
    );
    assert_eq!(
        error.causes().to_vec()[0].kind,
        CauseKind::NoMatchingExecutionPlatform
    );
}

/// A named execution group resolves its own toolchain context.
#[test]
fn exec_groups_resolve_independently() {
    let loader = Arc::new(FixtureLoader::new());
    let (resolver, _tc) = toolchain_fixture(&loader);
    let grouped_rule = RuleClassBuilder::new(
        "grouped_binary",
        Arc::new(RecordingImpl {
            provider: "DemoInfo".to_owned(),
        }),
    )
    .toolchains(vec![label("//types:compiler")])
    .exec_group(
        "link",
        ExecGroup {
            toolchain_types: vec![label("//types:compiler")],
            exec_compatible_with: Vec::new(),
        },
    )
    .fragments(&["core", "platform"])
    .build()
    .expect("rule class builds");

    let bin = label("//a:bin");
    loader.put(package(
        bin.package_id(),
        vec![rule_target(&bin, &grouped_rule, vec![])],
    ));
    let mut h = harness_with(
        loader,
        resolver,
        Vec::new(),
        AnalysisOptions::default(),
    );
    let cfg = target_config(&h, "fastbuild");

    let value = request_ct(&mut h, &bin, Some(cfg)).expect("analyzes");
    let ConfiguredTargetValue::Rule(rule_ct) = value.as_ref() else {
        panic!("expected rule value");
    };
    assert!(rule_ct.exec_group_bindings.contains_key("default"));
    assert!(rule_ct.exec_group_bindings.contains_key("link"));
}

/// The debug predicate turns on verbose resolution diagnostics for
/// matching labels only.
#[test]
fn debug_predicate_emits_diagnostics() {
    let loader = Arc::new(FixtureLoader::new());
    let (resolver, _tc) = toolchain_fixture(&loader);
    let bin = label("//a:bin");
    loader.put(package(
        bin.package_id(),
        vec![rule_target(&bin, &compiled_rule(), vec![])],
    ));
    let mut h = harness_with(
        loader,
        resolver,
        Vec::new(),
        AnalysisOptions {
            debug_toolchain_resolution: Some(Arc::new(|l: &anvil_analysis::Label| {
                l.name() == "bin"
            })),
            ..AnalysisOptions::default()
        },
    );
    let cfg = target_config(&h, "fastbuild");

    request_ct(&mut h, &bin, Some(cfg)).expect("analyzes");
    let infos: Vec<String> = h
        .sink
        .take()
        .into_iter()
        .filter(|e| e.kind == EventKind::Info)
        .map(|e| e.message)
        .collect();
    assert!(
        infos.iter().any(|m| m.contains("toolchain")),
        "expected toolchain diagnostics: {infos:?}"
    );
}

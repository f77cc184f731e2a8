// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use anvil_analysis::{AttrValue, ConfiguredTargetValue};

use common::{
    alias_target, harness, label, library_rule, package, provider_strs, request_ct, rule_target,
    target_config, FixtureLoader,
};

/// Two-pass alias resolution: a dependency that is an alias into a package the
/// parent never mentioned still lands in the dep-value map with the
/// underlying target attached.
#[test]
fn alias_into_foreign_package_resolves() {
    let loader = Arc::new(FixtureLoader::new());
    let demo = library_rule("demo_library", "DemoInfo");
    let bin = label("//a:bin");
    let redirect = label("//b:redirect");
    let real = label("//c:real");

    loader.put(package(
        bin.package_id(),
        vec![rule_target(
            &bin,
            &demo,
            vec![("deps", AttrValue::LabelList(vec![redirect.clone()]))],
        )],
    ));
    loader.put(package(
        redirect.package_id(),
        vec![alias_target(&redirect, &real)],
    ));
    loader.put(package(
        real.package_id(),
        vec![rule_target(&real, &demo, vec![])],
    ));
    let mut h = harness(loader);
    let cfg = target_config(&h, "fastbuild");

    let value = request_ct(&mut h, &bin, Some(cfg)).expect("analyzes");
    // The alias's providers are the underlying target's.
    let dep_providers = provider_strs(&value, "DemoInfo", "dep_providers");
    assert!(
        dep_providers.contains(&"DemoInfo".to_owned()),
        "{dep_providers:?}"
    );
    // The transitive package set walks through all three packages.
    let packages = value
        .transitive_packages()
        .expect("tracking enabled")
        .to_vec();
    assert!(packages.contains(&bin.package_id()));
    assert!(packages.contains(&redirect.package_id()));
    assert!(packages.contains(&real.package_id()));
}

/// Alias chains resolve to the final underlying label.
#[test]
fn alias_chains_follow_to_the_end() {
    let loader = Arc::new(FixtureLoader::new());
    let demo = library_rule("demo_library", "DemoInfo");
    let first = label("//a:first");
    let second = label("//b:second");
    let real = label("//c:real");

    loader.put(package(first.package_id(), vec![alias_target(&first, &second)]));
    loader.put(package(second.package_id(), vec![alias_target(&second, &real)]));
    loader.put(package(real.package_id(), vec![rule_target(&real, &demo, vec![])]));
    let mut h = harness(loader);
    let cfg = target_config(&h, "fastbuild");

    let value = request_ct(&mut h, &first, Some(cfg)).expect("analyzes");
    let ConfiguredTargetValue::Alias {
        underlying,
        providers,
        ..
    } = value.as_ref()
    else {
        panic!("expected an alias value");
    };
    assert_eq!(underlying, &real);
    assert!(providers.contains(&anvil_analysis::ProviderId::new("DemoInfo")));
}

/// A broken alias (actual target does not exist) is a loading failure, not
/// a mask-able miss.
#[test]
fn alias_to_missing_target_fails() {
    let loader = Arc::new(FixtureLoader::new());
    let demo = library_rule("demo_library", "DemoInfo");
    let bin = label("//a:bin");
    let redirect = label("//b:redirect");
    let ghost = label("//c:ghost");

    loader.put(package(
        bin.package_id(),
        vec![rule_target(
            &bin,
            &demo,
            vec![("deps", AttrValue::LabelList(vec![redirect.clone()]))],
        )],
    ));
    loader.put(package(
        redirect.package_id(),
        vec![alias_target(&redirect, &ghost)],
    ));
    loader.put(package(ghost.package_id(), vec![]));
    let mut h = harness(loader);
    let cfg = target_config(&h, "fastbuild");

    let error = common::expect_failure(request_ct(&mut h, &bin, Some(cfg)));
    assert!(
        error.causes().to_vec().iter().any(|c| c.label == ghost),
        "{error:?}"
    );
}

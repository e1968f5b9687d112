//! Properties of the reference walker and the diff engine over fixture documents

use std::collections::BTreeSet;

use api_spec_registry::diff::{ChangeType, DiffResult};
use api_spec_registry::references::{
    find_usages, rewrite_references, validate_references, ComponentRef, ReferenceIndex,
};
use api_spec_registry::diff_documents;
use serde_json::{json, Value};

fn fixtures() -> Vec<(&'static str, Value)> {
    vec![
        ("sample_api_v1", serde_json::from_str(include_str!("fixtures/sample_api_v1.json")).unwrap()),
        ("broken_ref", serde_json::from_str(include_str!("fixtures/broken_ref.json")).unwrap()),
        ("petstore", serde_json::from_str(include_str!("fixtures/petstore.json")).unwrap()),
    ]
}

#[test]
fn test_rewrite_there_and_back_restores_the_document() {
    for (name, original) in fixtures() {
        let index = ReferenceIndex::build(&original);
        for reference in index.references() {
            let mut doc = original.clone();
            let placeholder = "#/components/schemas/__RoundTrip";
            assert!(!index.contains(placeholder));

            let there = rewrite_references(&mut doc, reference, placeholder).unwrap();
            let back = rewrite_references(&mut doc, placeholder, reference).unwrap();

            assert_eq!(there.count, back.count, "{}: {}", name, reference);
            assert_eq!(there.locations, back.locations);
            assert_eq!(doc, original, "{}: {} did not round-trip", name, reference);
        }
    }
}

#[test]
fn test_validation_is_idempotent() {
    for (name, doc) in fixtures() {
        let first = validate_references(&doc);
        let second = validate_references(&doc);
        assert_eq!(first, second, "{}", name);
    }
}

#[test]
fn test_usages_cover_every_location() {
    for (name, doc) in fixtures() {
        let index = ReferenceIndex::build(&doc);
        let mut seen = 0;

        for (reference, locations) in index.iter() {
            let Some(component) = ComponentRef::parse(reference) else {
                continue;
            };
            let usages = find_usages(&doc, &component.kind, &component.name).unwrap();
            assert_eq!(usages.len(), locations.len(), "{}: {}", name, reference);

            let distinct: BTreeSet<String> = usages.iter().map(|u| u.location.to_pointer()).collect();
            assert_eq!(distinct.len(), usages.len());
            for usage in &usages {
                assert_eq!(doc.pointer(&usage.location.to_pointer()), Some(&json!(reference)));
            }
            seen += usages.len();
        }

        assert_eq!(seen, index.total_usages(), "{}", name);
    }
}

#[test]
fn test_petstore_references_all_resolve() {
    let (_, doc) = fixtures().remove(2);
    let report = validate_references(&doc);
    assert!(report.valid, "{:?}", report.broken);

    // Path-level and operation-level parameters, allOf members and nested items are all walked
    assert_eq!(find_usages(&doc, "schemas", "Pet").unwrap().len(), 3);
    assert_eq!(find_usages(&doc, "schemas", "NewPet").unwrap().len(), 2);
    assert_eq!(find_usages(&doc, "schemas", "PetStatus").unwrap().len(), 2);
    assert_eq!(find_usages(&doc, "parameters", "TraceId").unwrap().len(), 1);
    assert_eq!(find_usages(&doc, "responses", "Error").unwrap().len(), 3);
}

fn endpoint_sets(result: &DiffResult) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut added = BTreeSet::new();
    let mut removed = BTreeSet::new();
    for change in result.changes() {
        match change.change_type {
            ChangeType::EndpointAdded => {
                added.insert(change.target.clone());
            }
            ChangeType::EndpointRemoved => {
                removed.insert(change.target.clone());
            }
            _ => {}
        }
    }
    (added, removed)
}

fn schema_sets(result: &DiffResult) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut added = BTreeSet::new();
    let mut removed = BTreeSet::new();
    for change in result.changes() {
        match change.change_type {
            ChangeType::SchemaAdded => {
                added.insert(change.target.clone());
            }
            ChangeType::SchemaRemoved => {
                removed.insert(change.target.clone());
            }
            _ => {}
        }
    }
    (added, removed)
}

#[test]
fn test_additions_and_removals_mirror_when_reversed() {
    let all = fixtures();
    for (a_name, a) in &all {
        for (b_name, b) in &all {
            let forward = diff_documents(a, b);
            let backward = diff_documents(b, a);

            let (fwd_added, fwd_removed) = endpoint_sets(&forward);
            let (bwd_added, bwd_removed) = endpoint_sets(&backward);
            assert_eq!(fwd_added, bwd_removed, "{} -> {}", a_name, b_name);
            assert_eq!(fwd_removed, bwd_added, "{} -> {}", a_name, b_name);

            let (fwd_added, fwd_removed) = schema_sets(&forward);
            let (bwd_added, bwd_removed) = schema_sets(&backward);
            assert_eq!(fwd_added, bwd_removed, "{} -> {}", a_name, b_name);
            assert_eq!(fwd_removed, bwd_added, "{} -> {}", a_name, b_name);
        }
    }
}

#[test]
fn test_self_diff_is_always_empty() {
    for (name, doc) in fixtures() {
        let result = diff_documents(&doc, &doc);
        assert!(result.is_empty(), "{}: {:?}", name, result);
        assert!(result.changes_summary().is_empty());
    }
}

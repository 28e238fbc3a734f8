use tagmirror_git::store::TagReference;
use tagmirror_git::versioning::parse_version_loose;
use tagmirror_git::{CommitId, Constraint, SemverTagIndex};

fn tags(names: &[&str]) -> Vec<TagReference> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            TagReference::new(format!("refs/tags/{}", name), CommitId::new(format!("{:040x}", i)))
        })
        .collect()
}

fn best(names: &[&str], constraint: &str) -> Option<String> {
    let index = SemverTagIndex::build(tags(names));
    let constraint = Constraint::parse(constraint).unwrap();
    index
        .highest_match(&constraint)
        .map(|entry| entry.reference.short_name().to_string())
}

const RELEASES: [&str; 5] = ["1.0.0", "1.0.1", "1.1.0", "2.0.0", "2.0.1-alpha"];

#[test]
fn test_documented_selections() {
    assert_eq!(best(&RELEASES, "^1.0.0").as_deref(), Some("1.1.0"));
    assert_eq!(best(&RELEASES, "~2.0.0-0").as_deref(), Some("2.0.1-alpha"));
    assert_eq!(best(&RELEASES, "~9.9.9"), None);
}

#[test]
fn test_selection_independent_of_input_order() {
    let mut names = RELEASES.to_vec();
    let expected = best(&names, "^1.0.0");

    for _ in 0..names.len() {
        names.rotate_left(1);
        assert_eq!(best(&names, "^1.0.0"), expected);
        names.reverse();
        assert_eq!(best(&names, "^1.0.0"), expected);
    }
}

#[test]
fn test_unparseable_tags_never_selected() {
    let names = ["latest", "1.0.0", "release-2", "v1.2.0", "1.2.x", "stable"];
    let index = SemverTagIndex::build(tags(&names));

    assert_eq!(index.len(), 2);
    assert_eq!(best(&names, "*").as_deref(), Some("v1.2.0"));
    assert_eq!(best(&names, ">=0.0.0").as_deref(), Some("v1.2.0"));
}

#[test]
fn test_matching_run_stops_at_first_gap() {
    // `<1.1.0 || >=2.0.0` matches two runs; only the first is considered.
    let names = ["1.0.0", "1.0.5", "1.1.0", "2.0.0", "2.1.0"];
    assert_eq!(best(&names, "<1.1.0 || >=2.0.0").as_deref(), Some("1.0.5"));
}

#[test]
fn test_prerelease_only_matches_prerelease_comparators() {
    let names = ["1.0.0", "1.1.0-beta.1", "1.1.0-beta.2"];
    assert_eq!(best(&names, "^1.0.0").as_deref(), Some("1.0.0"));
    assert_eq!(best(&names, ">=1.1.0-beta.1").as_deref(), Some("1.1.0-beta.2"));
}

#[test]
fn test_loose_versions() {
    assert_eq!(parse_version_loose("v1").unwrap().to_string(), "1.0.0");
    assert_eq!(parse_version_loose("V1.2").unwrap().to_string(), "1.2.0");
    assert!(parse_version_loose("one").is_none());
}

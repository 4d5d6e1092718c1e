use gitsync_fs::{NormalizedPath, RelativePath, RequestPath, RootPolicy, join_relative, validate};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[test]
fn test_normalized_path_forward_slashes() {
    let path = NormalizedPath::new("repos\\local\\dash.json");
    assert_eq!(path.as_str(), "repos/local/dash.json");
}

#[test]
fn test_normalized_join_resolves_dots() {
    let base = NormalizedPath::new("/a/b");
    assert_eq!(base.join("c").as_str(), "/a/b/c");
    assert_eq!(base.join("./c").as_str(), "/a/b/c");
    assert_eq!(base.join("../c").as_str(), "/a/c");
}

#[test]
fn test_normalized_starts_with_is_segment_aware() {
    let root = NormalizedPath::new("/workspace");
    assert!(NormalizedPath::new("/workspace/a").starts_with(&root));
    assert!(!NormalizedPath::new("/workspace-other/a").starts_with(&root));
}

#[rstest]
#[case("dash.json", "dash.json", false)]
#[case("folder/dash.json", "folder/dash.json", false)]
#[case("folder/", "folder/", true)]
#[case("/folder/nested/", "folder/nested/", true)]
#[case("/", "", true)]
fn test_canonical_forms(#[case] input: &str, #[case] expected: &str, #[case] is_dir: bool) {
    let path = RelativePath::parse(input).unwrap();
    assert_eq!(path.as_str(), expected);
    assert_eq!(path.is_dir(), is_dir);
}

#[test]
fn test_same_name_file_and_directory_are_distinct() {
    let file = RelativePath::parse("folder").unwrap();
    let dir = RelativePath::parse("folder/").unwrap();
    assert_ne!(file, dir);
    assert_eq!(file.as_dir(), dir);
}

#[test]
fn test_file_rejects_directory_form() {
    assert!(RelativePath::file("folder/").is_err());
    assert!(RelativePath::file("folder/dash.json").is_ok());
}

#[test]
fn test_join_relative_with_prefix() {
    let prefix = RelativePath::parse("grafana/").unwrap();
    let rel = RelativePath::parse("nested/dash.json").unwrap();
    assert_eq!(join_relative(&prefix, &rel).as_str(), "grafana/nested/dash.json");
    assert_eq!(join_relative(&RelativePath::root(), &rel), rel);
}

#[test]
fn test_validate_from_segments() {
    let request = RequestPath::from_segments(["folder", "dash.json"], false);
    let path = validate(&request, RootPolicy::Deny).unwrap();
    assert_eq!(path.as_str(), "folder/dash.json");
    assert_eq!(path.extension(), Some("json"));
    assert_eq!(path.parent().unwrap().as_str(), "folder/");
}

#[test]
fn test_relative_path_serde_validates() {
    let ok: RelativePath = serde_json::from_str("\"a/b.json\"").unwrap();
    assert_eq!(ok.as_str(), "a/b.json");
    assert!(serde_json::from_str::<RelativePath>("\"a/../b.json\"").is_err());
}

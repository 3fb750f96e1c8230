use std::path::PathBuf;

use h1bfilter::storage::JsonFileStorage;
use tempfile::TempDir;

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

pub fn load_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative))
        .unwrap_or_else(|_| panic!("Failed to load fixture: {}", relative))
}

/// One search-results row with `submit_date` in the submit-date column
pub fn filing_row(employer: &str, submit_date: &str) -> String {
    format!(
        "<tr><td><a href=\"#\">{}</a></td><td>SOFTWARE ENGINEER</td><td>150,000</td>\
         <td>SEATTLE, WA</td><td>{}</td><td>09/01/2024</td><td>CERTIFIED</td></tr>",
        employer, submit_date
    )
}

/// Result page wrapping `rows` in the listing site's table layout
pub fn results_page(rows: &[String]) -> String {
    load_fixture("results_page.html").replace("{{ROWS}}", &rows.concat())
}

/// Storage file in a fresh temp dir; keep the dir alive for the test
pub fn temp_storage() -> (TempDir, JsonFileStorage) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage = JsonFileStorage::new(dir.path().join("cache").join("storage.json"));
    (dir, storage)
}

fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use cloudport_protocol::{
        ApiEnvelope, CompleteUploadRequest, CreateFileRequest, DownloadInfo, DownloadKind,
        DownloadRequest, DownloadResponse, FileCreated, FolderListing, InitUploadRequest,
        InitUploadResponse, PrecheckRequest, PrecheckResponse, part_number_from_object_key,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (key-order independent). Returns the parsed value.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    // --- Upload ---

    #[test]
    fn fixture_precheck_request() {
        let req = roundtrip_test::<PrecheckRequest>("precheck_request.json");
        assert_eq!(req.parent_path, "/docs");
    }

    #[test]
    fn fixture_precheck_response_miss() {
        let resp = roundtrip_test::<PrecheckResponse>("precheck_response_miss.json");
        assert!(!resp.file_exists);
        assert!(resp.file_id.is_none());
        assert!(resp.presigned_url.is_some());
    }

    #[test]
    fn fixture_precheck_response_hit() {
        let env = roundtrip_test::<ApiEnvelope<PrecheckResponse>>("precheck_response_hit.json");
        let resp = env.into_result().unwrap().unwrap();
        assert!(resp.file_exists);
        assert_eq!(resp.file_id, Some(4411));
    }

    #[test]
    fn fixture_create_file_request() {
        let req = roundtrip_test::<CreateFileRequest>("create_file_request.json");
        assert!(!req.url.contains('?'));
        assert!(!req.is_dir);
    }

    #[test]
    fn fixture_file_created() {
        let env = roundtrip_test::<ApiEnvelope<FileCreated>>("file_created.json");
        assert_eq!(env.into_result().unwrap().unwrap().file_id, 4412);
    }

    #[test]
    fn fixture_init_upload_request() {
        let req = roundtrip_test::<InitUploadRequest>("init_upload_request.json");
        assert_eq!(req.preferred_chunk_size, 10 * 1024 * 1024);
    }

    #[test]
    fn fixture_init_upload_response() {
        let env = roundtrip_test::<ApiEnvelope<InitUploadResponse>>("init_upload_response.json");
        let resp = env.into_result().unwrap().unwrap();
        assert_eq!(resp.upload_id, "u-7c1e");
        assert_eq!(resp.chunk_urls.len(), 2);
        let stored: Vec<_> = resp
            .existing_parts
            .iter()
            .filter_map(|p| part_number_from_object_key(&p.object_key))
            .collect();
        assert_eq!(stored, vec![1, 2]);
    }

    #[test]
    fn fixture_complete_upload_request() {
        let req = roundtrip_test::<CompleteUploadRequest>("complete_upload_request.json");
        let parts: Vec<_> = req.uploaded_chunks.iter().map(|c| c.part_number).collect();
        assert_eq!(parts, vec![1, 2, 3]);
    }

    // --- Browse / download ---

    #[test]
    fn fixture_folder_listing() {
        let env = roundtrip_test::<ApiEnvelope<FolderListing>>("folder_listing.json");
        let listing = env.into_result().unwrap().unwrap();
        assert_eq!(listing.total, 2);
        assert!(listing.contents[0].is_dir);
        assert_eq!(listing.contents[1].kind, "pdf");
    }

    #[test]
    fn fixture_download_request() {
        let req = roundtrip_test::<DownloadRequest>("download_request.json");
        assert_eq!(req.zip_name.as_deref(), Some("docs.zip"));
    }

    #[test]
    fn fixture_download_response_zip() {
        let env = roundtrip_test::<ApiEnvelope<DownloadResponse>>("download_response_zip.json");
        let resp = env.into_result().unwrap().unwrap();
        assert_eq!(resp.kind, DownloadKind::Zip);
        assert_eq!(resp.total_size, 482_233);
        assert!(resp.files.iter().all(|f| f.dlink.is_none()));
    }

    #[test]
    fn fixture_download_info() {
        let env = roundtrip_test::<ApiEnvelope<DownloadInfo>>("download_info.json");
        let info = env.into_result().unwrap().unwrap();
        assert!(info.accept_ranges);
        assert_eq!(info.total_size, 482_113);
    }

    #[test]
    fn fixture_error_envelope() {
        let env = roundtrip_test::<ApiEnvelope<FileCreated>>("error_envelope.json");
        let err = env.into_result().unwrap_err();
        assert_eq!(err.code, 40100);
        assert_eq!(err.message, "token expired");
    }

    #[test]
    fn all_fixtures_are_exercised() {
        let mut names: Vec<_> = fs::read_dir(fixtures_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names.len(), 13, "new fixture without a test: {names:?}");
    }
}

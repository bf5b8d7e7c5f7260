//! Tool resolution and installation against a local HTTP server.
//!
//! - Ordered fallbacks: 404, then an undersized body, then a valid archive
//! - A second resolve is served locally with zero requests
//! - Exhausted sources surface as InstallFailed

use omniflash::config::{Settings, ToolSourceOverride};
use omniflash::{ToolError, ToolKind, ToolResolver};
use std::io::{Cursor, Write};
use tempfile::TempDir;

fn heimdall_zip() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("heimdall-1.4.2/README", options).unwrap();
        zip.write_all(b"Heimdall flashing tool\n").unwrap();
        zip.start_file("heimdall-1.4.2/bin/heimdall", options).unwrap();
        zip.write_all(b"#!/bin/sh\necho heimdall\n").unwrap();
        zip.write_all(&[b'#'; 2048]).unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}

fn settings_with_sources(temp: &TempDir, primary: String, fallbacks: Vec<String>) -> Settings {
    let mut settings = Settings {
        tools_dir: temp.path().join("tools"),
        loaders_dir: temp.path().join("loaders"),
        scratch_root: temp.path().join("scratch"),
        ..Settings::default()
    };
    settings.tool_sources.insert(
        ToolKind::Heimdall,
        ToolSourceOverride {
            primary_url: Some(primary),
            fallback_urls: fallbacks,
        },
    );
    settings
}

#[tokio::test]
async fn test_fallback_order_and_idempotent_resolve() {
    let mut server = mockito::Server::new_async().await;
    let missing = server
        .mock("GET", "/primary/heimdall.zip")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let tiny = server
        .mock("GET", "/mirror-a/heimdall.zip")
        .with_status(200)
        .with_body("0123456789")
        .expect(1)
        .create_async()
        .await;
    let good = server
        .mock("GET", "/mirror-b/heimdall.zip")
        .with_status(200)
        .with_body(heimdall_zip())
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let base = server.url();
    let settings = settings_with_sources(
        &temp,
        format!("{}/primary/heimdall.zip", base),
        vec![
            format!("{}/mirror-a/heimdall.zip", base),
            format!("{}/mirror-b/heimdall.zip", base),
        ],
    );
    let resolver = ToolResolver::new(settings).unwrap().with_search_dirs(vec![]);

    let handle = resolver.resolve(ToolKind::Heimdall).await.unwrap();
    let managed = resolver.managed_dir(ToolKind::Heimdall);
    assert!(handle.program.starts_with(&managed));
    assert!(handle.program.ends_with("bin/heimdall"));
    assert!(handle.interpreter.is_none());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&handle.program).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }

    // Served from the managed directory; every mock still saw exactly one hit.
    let again = resolver.resolve(ToolKind::Heimdall).await.unwrap();
    assert_eq!(again.program, handle.program);

    let fresh = ToolResolver::new(settings_with_sources(&temp, format!("{}/primary/heimdall.zip", base), vec![]))
        .unwrap()
        .with_search_dirs(vec![]);
    assert_eq!(fresh.resolve(ToolKind::Heimdall).await.unwrap().program, handle.program);

    missing.assert_async().await;
    tiny.assert_async().await;
    good.assert_async().await;

    // No staging leftovers next to the install.
    let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("tools"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_all_sources_failing_is_install_failed() {
    let mut server = mockito::Server::new_async().await;
    let _gone = server
        .mock("GET", "/gone.zip")
        .with_status(500)
        .create_async()
        .await;
    let _small = server
        .mock("GET", "/small.zip")
        .with_status(200)
        .with_body("PK")
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let settings = settings_with_sources(
        &temp,
        format!("{}/gone.zip", server.url()),
        vec![format!("{}/small.zip", server.url())],
    );
    let resolver = ToolResolver::new(settings).unwrap().with_search_dirs(vec![]);

    let err = resolver.resolve(ToolKind::Heimdall).await.unwrap_err();
    assert!(matches!(err, ToolError::InstallFailed { .. }), "got {:?}", err);
    assert!(!resolver.managed_dir(ToolKind::Heimdall).exists());
}

#[tokio::test]
async fn test_locate_does_not_download() {
    let mut server = mockito::Server::new_async().await;
    let never = server
        .mock("GET", "/heimdall.zip")
        .with_status(200)
        .with_body(heimdall_zip())
        .expect(0)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let settings = settings_with_sources(&temp, format!("{}/heimdall.zip", server.url()), vec![]);
    let resolver = ToolResolver::new(settings).unwrap().with_search_dirs(vec![]);

    assert!(matches!(
        resolver.locate(ToolKind::Heimdall).await,
        Err(ToolError::NotInstalled(_))
    ));
    never.assert_async().await;
}

//! Integration tests for title resolution and host software reconciliation.

mod common;

use canon_core::FingerprintService;
use canon_core::software::SoftwareFact;
use canon_metadata::{MetadataError, MetadataStore};
use canon_metadata::models::ResolutionOutcome;
use common::{TestMetadata, program, run_metadata_test_both};
use std::sync::Arc;
use time::OffsetDateTime;

#[tokio::test]
async fn test_resolve_software_is_idempotent_by_checksum() {
    run_metadata_test_both(|store| async move {
        let fact = program("Firefox", "128.0", None);

        let first = store.resolve_software(&fact).await.expect("first resolve");
        assert_eq!(first.outcome, ResolutionOutcome::Created);

        let second = store.resolve_software(&fact).await.expect("second resolve");
        assert_eq!(second.outcome, ResolutionOutcome::Existing);
        assert_eq!(second.software_id, first.software_id);
        assert_eq!(second.title_id, first.title_id);

        // Surrounding whitespace does not change the fingerprint.
        let padded = program("  Firefox ", " 128.0", None);
        let third = store.resolve_software(&padded).await.expect("padded resolve");
        assert_eq!(third.software_id, first.software_id);

        let checksum = FingerprintService::software(&fact).to_hex();
        let row = store
            .get_software_by_checksum(&checksum)
            .await
            .expect("lookup by checksum")
            .expect("software row exists");
        assert_eq!(row.software_id, first.software_id);
        assert_eq!(row.checksum, checksum);
        assert!(
            store
                .get_software_by_checksum(&"0".repeat(64))
                .await
                .unwrap()
                .is_none()
        );

        let software = store
            .list_title_software(first.title_id)
            .await
            .expect("list title software");
        assert_eq!(software.len(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_versions_share_a_title() {
    run_metadata_test_both(|store| async move {
        let v1 = store
            .resolve_software(&program("Slack", "4.40", None))
            .await
            .unwrap();
        let v2 = store
            .resolve_software(&program("Slack", "4.41", None))
            .await
            .unwrap();

        assert_ne!(v1.software_id, v2.software_id);
        assert_eq!(v1.title_id, v2.title_id);
        assert_eq!(v2.outcome, ResolutionOutcome::Linked);

        let versions: Vec<String> = store
            .list_title_software(v1.title_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.version)
            .collect();
        assert_eq!(versions, vec!["4.40", "4.41"]);
    })
    .await;
}

#[tokio::test]
async fn test_upgrade_code_backfills_codeless_title() {
    run_metadata_test_both(|store| async move {
        let old = store
            .resolve_software(&program("Figma", "116.0", None))
            .await
            .unwrap();
        let title = store.get_title(old.title_id).await.unwrap().unwrap();
        assert_eq!(title.upgrade_code(), None);

        let new = store
            .resolve_software(&program("Figma", "117.0", Some("{FIGMA-CODE}")))
            .await
            .unwrap();
        assert_eq!(new.outcome, ResolutionOutcome::Backfilled);
        assert_eq!(new.title_id, old.title_id);

        let title = store.get_title(old.title_id).await.unwrap().unwrap();
        assert_eq!(title.upgrade_code(), Some("{FIGMA-CODE}"));

        let owner = store
            .find_title_by_upgrade_code("{FIGMA-CODE}")
            .await
            .unwrap()
            .expect("title owns the backfilled code");
        assert_eq!(owner.title_id, old.title_id);

        // A later version with the same code links without changes.
        let later = store
            .resolve_software(&program("figma", "118.0", Some("{FIGMA-CODE}")))
            .await
            .unwrap();
        assert_eq!(later.title_id, old.title_id);
        assert_eq!(later.outcome, ResolutionOutcome::Linked);
    })
    .await;
}

#[tokio::test]
async fn test_conflicting_upgrade_code_is_redirected() {
    run_metadata_test_both(|store| async move {
        let community = store
            .resolve_software(&program("Visual Studio", "17.8", Some("{VS-COMMUNITY}")))
            .await
            .unwrap();
        assert_eq!(community.outcome, ResolutionOutcome::Created);

        let professional = store
            .resolve_software(&program("Visual Studio", "17.9", Some("{VS-PRO}")))
            .await
            .unwrap();
        assert_eq!(professional.outcome, ResolutionOutcome::Redirected);
        assert_ne!(professional.title_id, community.title_id);

        // The first title keeps its code.
        let first = store.get_title(community.title_id).await.unwrap().unwrap();
        assert_eq!(first.upgrade_code(), Some("{VS-COMMUNITY}"));
        let second = store
            .get_title(professional.title_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.upgrade_code(), Some("{VS-PRO}"));

        // Both titles are name matches now; the code picks the right one.
        let again = store
            .resolve_software(&program("Visual Studio", "17.10", Some("{VS-PRO}")))
            .await
            .unwrap();
        assert_eq!(again.title_id, professional.title_id);
        assert_eq!(again.outcome, ResolutionOutcome::Linked);

        let titles = store
            .find_titles_by_name("visual studio", "programs", "")
            .await
            .unwrap();
        assert_eq!(titles.len(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_backfill_onto_owned_code_links_to_owner() {
    run_metadata_test_both(|store| async move {
        let owner = store
            .resolve_software(&program("Visual Studio 2022", "17.0", Some("{G}")))
            .await
            .unwrap();
        let community = store
            .resolve_software(&program("Visual Studio Community 2022", "17.0", None))
            .await
            .unwrap();
        assert_ne!(owner.title_id, community.title_id);

        // The codeless name match would be backfilled, but {G} is taken.
        let resolved = store
            .resolve_software(&program("Visual Studio Community 2022", "17.1", Some("{G}")))
            .await
            .unwrap();
        assert_eq!(resolved.title_id, owner.title_id);
        assert_eq!(resolved.outcome, ResolutionOutcome::Redirected);

        let untouched = store
            .get_title(community.title_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.upgrade_code(), None);
        let owner_title = store.get_title(owner.title_id).await.unwrap().unwrap();
        assert_eq!(owner_title.upgrade_code(), Some("{G}"));

        // The transaction stays usable after the failed backfill.
        let row = store
            .get_software_by_checksum(&FingerprintService::software(&program(
                "Visual Studio Community 2022",
                "17.1",
                Some("{G}"),
            ))
            .to_hex())
            .await
            .unwrap()
            .expect("software row committed");
        assert_eq!(row.title_id, owner.title_id);

        // Codeless reports of the community edition still land on its own title.
        let later = store
            .resolve_software(&program("Visual Studio Community 2022", "17.2", None))
            .await
            .unwrap();
        assert_eq!(later.title_id, community.title_id);
    })
    .await;
}

#[tokio::test]
async fn test_codeless_names_converge_ignoring_case() {
    run_metadata_test_both(|store| async move {
        let upper = store
            .resolve_software(&program("FooApp", "1.0", None))
            .await
            .unwrap();
        let lower = store
            .resolve_software(&program("fooapp", "2.0", None))
            .await
            .unwrap();

        assert_eq!(upper.title_id, lower.title_id);
        assert_ne!(upper.software_id, lower.software_id);

        // The first spelling names the title.
        let title = store.get_title(upper.title_id).await.unwrap().unwrap();
        assert_eq!(title.name, "FooApp");

        // Case folding is not limited to ASCII.
        let umlaut = store
            .resolve_software(&program("Ärzte Tool", "1", None))
            .await
            .unwrap();
        let folded = store
            .resolve_software(&program("ärzte tool", "2", None))
            .await
            .unwrap();
        assert_eq!(umlaut.title_id, folded.title_id);
        assert_eq!(folded.outcome, ResolutionOutcome::Linked);

        let found = store
            .find_titles_by_name("ÄRZTE TOOL", "programs", "")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Ärzte Tool");
    })
    .await;
}

#[tokio::test]
async fn test_source_and_browser_match_ignoring_case() {
    run_metadata_test_both(|store| async move {
        let lower = store
            .resolve_software(&SoftwareFact::new("Foo", "1", "programs"))
            .await
            .unwrap();
        let upper = store
            .resolve_software(&SoftwareFact::new("Foo", "2", "Programs"))
            .await
            .unwrap();
        assert_eq!(lower.title_id, upper.title_id);
        assert_ne!(lower.software_id, upper.software_id);

        let mut chrome = SoftwareFact::new("Dark Reader", "4.9", "chrome_extensions");
        chrome.browser = "chrome".to_string();
        let chrome = store.resolve_software(&chrome).await.unwrap();
        let mut shouty = SoftwareFact::new("dark reader", "4.10", "Chrome_Extensions");
        shouty.browser = "Chrome".to_string();
        let shouty = store.resolve_software(&shouty).await.unwrap();
        assert_eq!(chrome.title_id, shouty.title_id);
    })
    .await;
}

#[tokio::test]
async fn test_upgrade_code_is_never_cleared() {
    run_metadata_test_both(|store| async move {
        let coded = store
            .resolve_software(&program("Zoom", "6.0", Some("{ZOOM}")))
            .await
            .unwrap();

        let codeless = store
            .resolve_software(&program("Zoom", "6.1", None))
            .await
            .unwrap();
        assert_eq!(codeless.title_id, coded.title_id);
        assert_eq!(codeless.outcome, ResolutionOutcome::Linked);

        let blank = store
            .resolve_software(&program("Zoom", "6.2", Some("   ")))
            .await
            .unwrap();
        assert_eq!(blank.title_id, coded.title_id);

        let title = store.get_title(coded.title_id).await.unwrap().unwrap();
        assert_eq!(title.upgrade_code(), Some("{ZOOM}"));
    })
    .await;
}

#[tokio::test]
async fn test_sources_and_browsers_are_separate_titles() {
    run_metadata_test_both(|store| async move {
        let desktop = store
            .resolve_software(&program("uBlock Origin", "1.58", None))
            .await
            .unwrap();

        let mut chrome = SoftwareFact::new("uBlock Origin", "1.58", "chrome_extensions");
        chrome.browser = "chrome".to_string();
        let chrome = store.resolve_software(&chrome).await.unwrap();

        let mut edge = SoftwareFact::new("uBlock Origin", "1.58", "chrome_extensions");
        edge.browser = "edge".to_string();
        let edge = store.resolve_software(&edge).await.unwrap();

        assert_ne!(desktop.title_id, chrome.title_id);
        assert_ne!(chrome.title_id, edge.title_id);
    })
    .await;
}

#[tokio::test]
async fn test_resolve_rejects_invalid_facts() {
    run_metadata_test_both(|store| async move {
        let err = store
            .resolve_software(&SoftwareFact::new("  ", "1.0", "programs"))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Validation(_)), "got {err:?}");

        let err = store
            .resolve_software(&SoftwareFact::new("Tool", "1.0", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Validation(_)), "got {err:?}");
    })
    .await;
}

#[tokio::test]
async fn test_update_host_software_diffs_reports() {
    run_metadata_test_both(|store| async move {
        let host_id = 7;
        let first = store
            .update_host_software(
                host_id,
                &[program("Git", "2.45", None), program("Vim", "9.1", None)],
            )
            .await
            .unwrap();
        assert_eq!(first.inserted.len(), 2);
        assert!(first.deleted.is_empty());

        let unchanged = store
            .update_host_software(
                host_id,
                &[program("Git", "2.45", None), program("Vim", "9.1", None)],
            )
            .await
            .unwrap();
        assert!(unchanged.is_noop());

        let upgraded = store
            .update_host_software(
                host_id,
                &[program("Git", "2.46", None), program("Vim", "9.1", None)],
            )
            .await
            .unwrap();
        assert_eq!(upgraded.inserted.len(), 1);
        assert_eq!(upgraded.deleted.len(), 1);

        let installed: Vec<(String, String)> = store
            .list_host_software(host_id)
            .await
            .unwrap()
            .into_iter()
            .map(|item| (item.software.name, item.software.version))
            .collect();
        assert_eq!(
            installed,
            vec![
                ("Git".to_string(), "2.46".to_string()),
                ("Vim".to_string(), "9.1".to_string())
            ]
        );

        // Removed software rows stay in the catalog.
        let titles = store.find_titles_by_name("git", "programs", "").await.unwrap();
        let versions = store.list_title_software(titles[0].title_id).await.unwrap();
        assert_eq!(versions.len(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_update_host_software_touches_last_opened() {
    run_metadata_test_both(|store| async move {
        let host_id = 8;
        let opened = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let mut fact = program("Terminal", "2.14", None);
        fact.last_opened_at = Some(opened);

        store
            .update_host_software(host_id, std::slice::from_ref(&fact))
            .await
            .unwrap();

        // An older timestamp is ignored.
        fact.last_opened_at = Some(opened - time::Duration::hours(1));
        let stale = store
            .update_host_software(host_id, std::slice::from_ref(&fact))
            .await
            .unwrap();
        assert!(stale.is_noop());

        let newer = opened + time::Duration::days(1);
        fact.last_opened_at = Some(newer);
        let touched = store
            .update_host_software(host_id, std::slice::from_ref(&fact))
            .await
            .unwrap();
        assert_eq!(touched.last_opened_updated, 1);
        assert!(touched.inserted.is_empty());

        let items = store.list_host_software(host_id).await.unwrap();
        assert_eq!(items[0].last_opened_at, Some(newer));
    })
    .await;
}

#[tokio::test]
async fn test_update_host_software_with_empty_report_removes_everything() {
    run_metadata_test_both(|store| async move {
        store
            .update_host_software(9, &[program("curl", "8.8", None)])
            .await
            .unwrap();
        let cleared = store.update_host_software(9, &[]).await.unwrap();
        assert_eq!(cleared.deleted.len(), 1);
        assert!(store.list_host_software(9).await.unwrap().is_empty());
    })
    .await;
}

/// Resolve `facts` from concurrent tasks and return the distinct title ids.
async fn resolve_concurrently(
    store: &Arc<dyn MetadataStore>,
    facts: Vec<SoftwareFact>,
) -> Vec<uuid::Uuid> {
    let mut handles = Vec::new();
    for fact in facts {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.resolve_software(&fact).await }));
    }

    let mut titles = Vec::new();
    for handle in handles {
        let resolved = handle.await.expect("task panicked").expect("resolve failed");
        titles.push(resolved.title_id);
    }
    titles.sort();
    titles.dedup();
    titles
}

#[tokio::test]
async fn test_concurrent_resolution_converges() {
    run_metadata_test_both(|store| async move {
        let codeless = (0..8)
            .map(|i| {
                let name = if i % 2 == 0 { "Notion" } else { "notion" };
                program(name, &format!("3.{i}"), None)
            })
            .collect();
        assert_eq!(resolve_concurrently(&store, codeless).await.len(), 1);

        let coded = (0..8)
            .map(|i| {
                let name = if i % 2 == 0 { "Slack" } else { "SLACK" };
                program(name, &format!("4.{i}"), Some("{SLACK}"))
            })
            .collect();
        let titles = resolve_concurrently(&store, coded).await;
        assert_eq!(titles.len(), 1);
        let owner = store
            .find_title_by_upgrade_code("{SLACK}")
            .await
            .unwrap()
            .expect("one title owns the code");
        assert_eq!(owner.title_id, titles[0]);
    })
    .await;
}

#[tokio::test]
async fn test_null_upgrade_code_is_treated_as_empty() {
    let metadata = TestMetadata::new().await.expect("Failed to create metadata");
    let store = metadata.store();

    let legacy = store
        .resolve_software(&program("Legacy Tool", "1.0", None))
        .await
        .unwrap();
    sqlx::query("UPDATE software_titles SET upgrade_code = NULL WHERE title_id = ?")
        .bind(legacy.title_id)
        .execute(metadata.pool())
        .await
        .unwrap();

    let title = store.get_title(legacy.title_id).await.unwrap().unwrap();
    assert!(title.upgrade_code.is_none());

    let coded = store
        .resolve_software(&program("Legacy Tool", "2.0", Some("{LEGACY}")))
        .await
        .unwrap();
    assert_eq!(coded.outcome, ResolutionOutcome::Backfilled);
    assert_eq!(coded.title_id, legacy.title_id);

    let title = store.get_title(legacy.title_id).await.unwrap().unwrap();
    assert_eq!(title.upgrade_code(), Some("{LEGACY}"));
}

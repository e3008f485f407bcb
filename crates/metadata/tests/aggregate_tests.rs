//! Integration tests for host count aggregation and the listings built on it.

mod common;

use canon_core::inventory::OperatingSystemFact;
use canon_core::listing::{CountScope, ListOptions, OrderDirection};
use canon_metadata::models::{CveMetaRow, OsVulnerabilityRow, SoftwareVulnerabilityRow};
use canon_metadata::repos::{TitleListOptions, VulnerabilityListOptions};
use canon_metadata::{MetadataError, MetadataStore};
use common::{add_host, add_team, program, run_metadata_test_both};
use time::OffsetDateTime;

/// Teams 1 and 2; hosts 1 and 2 in team 1, host 3 in team 2, host 4 in no
/// team. Every host runs Firefox 128, host 1 also runs Firefox 129 and
/// host 3 runs Chrome.
async fn seed_fleet(store: &dyn MetadataStore) {
    add_team(store, 1).await;
    add_team(store, 2).await;
    add_host(store, 1, Some(1)).await;
    add_host(store, 2, Some(1)).await;
    add_host(store, 3, Some(2)).await;
    add_host(store, 4, None).await;

    for host_id in 1..=4 {
        let mut report = vec![program("Firefox", "128.0", None)];
        if host_id == 1 {
            report.push(program("Firefox", "129.0", None));
        }
        if host_id == 3 {
            report.push(program("Chrome", "126.0", None));
        }
        store
            .update_host_software(host_id, &report)
            .await
            .expect("Failed to update host software");
    }
}

fn titles_in(scope: CountScope) -> TitleListOptions {
    TitleListOptions {
        scope,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_title_counts_per_scope() {
    run_metadata_test_both(|store| async move {
        seed_fleet(&*store).await;
        store
            .sync_all_counts(OffsetDateTime::now_utc())
            .await
            .unwrap();

        let firefox = store
            .find_titles_by_name("Firefox", "programs", "")
            .await
            .unwrap()
            .remove(0);
        let title_id = firefox.title_id;

        let count = |scope: CountScope| {
            let store = store.clone();
            async move { store.get_title_host_count(title_id, scope).await.unwrap() }
        };
        assert_eq!(count(CountScope::Global).await, 4);
        assert_eq!(count(CountScope::Team(1)).await, 2);
        assert_eq!(count(CountScope::Team(2)).await, 1);
        assert_eq!(count(CountScope::NoTeam).await, 1);
        assert_eq!(count(CountScope::Team(99)).await, 0);
    })
    .await;
}

#[tokio::test]
async fn test_list_software_titles() {
    run_metadata_test_both(|store| async move {
        seed_fleet(&*store).await;
        store
            .sync_all_counts(OffsetDateTime::now_utc())
            .await
            .unwrap();

        let (items, total, meta) = store
            .list_software_titles(&titles_in(CountScope::Global))
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(!meta.has_next_results);
        assert_eq!(items[0].title.name, "Firefox");
        assert_eq!(items[0].hosts_count, 4);
        assert_eq!(items[0].versions_count, 2);
        assert_eq!(items[1].title.name, "Chrome");
        assert_eq!(items[1].hosts_count, 1);

        // Only the versions installed in scope are counted.
        let (items, _, _) = store
            .list_software_titles(&titles_in(CountScope::Team(2)))
            .await
            .unwrap();
        let firefox = items.iter().find(|i| i.title.name == "Firefox").unwrap();
        assert_eq!(firefox.versions_count, 1);

        let (items, total, _) = store
            .list_software_titles(&titles_in(CountScope::NoTeam))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].title.name, "Firefox");

        let mut by_name = titles_in(CountScope::Global);
        by_name.list = ListOptions {
            per_page: 1,
            ..Default::default()
        }
        .ordered_by("name", OrderDirection::Asc);
        let (items, total, meta) = store.list_software_titles(&by_name).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.name, "Chrome");
        assert!(meta.has_next_results);

        let mut search = titles_in(CountScope::Global);
        search.search = Some("fire".to_string());
        let (items, total, _) = store.list_software_titles(&search).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].title.name, "Firefox");
    })
    .await;
}

#[tokio::test]
async fn test_resync_drops_uninstalled_counts() {
    run_metadata_test_both(|store| async move {
        seed_fleet(&*store).await;
        let now = OffsetDateTime::now_utc();
        store.sync_all_counts(now).await.unwrap();

        // Host 3 uninstalls everything.
        store.update_host_software(3, &[]).await.unwrap();
        let stats = store.sync_all_counts(now).await.unwrap();
        assert!(stats.titles.pruned > 0);

        let (items, total, _) = store
            .list_software_titles(&titles_in(CountScope::Team(2)))
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(items.is_empty());

        let (items, _, _) = store
            .list_software_titles(&titles_in(CountScope::Global))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].hosts_count, 3);
    })
    .await;
}

#[tokio::test]
async fn test_counts_follow_team_moves() {
    run_metadata_test_both(|store| async move {
        seed_fleet(&*store).await;
        let now = OffsetDateTime::now_utc();
        store.sync_title_host_counts(now).await.unwrap();

        add_host(&*store, 4, Some(2)).await;
        store.sync_title_host_counts(now).await.unwrap();

        let firefox = store
            .find_titles_by_name("Firefox", "programs", "")
            .await
            .unwrap()
            .remove(0);
        let team2 = store
            .get_title_host_count(firefox.title_id, CountScope::Team(2))
            .await
            .unwrap();
        let no_team = store
            .get_title_host_count(firefox.title_id, CountScope::NoTeam)
            .await
            .unwrap();
        assert_eq!(team2, 2);
        assert_eq!(no_team, 0);
    })
    .await;
}

#[tokio::test]
async fn test_vulnerability_listing_and_detail() {
    run_metadata_test_both(|store| async move {
        seed_fleet(&*store).await;
        let now = OffsetDateTime::now_utc();

        let firefox_128 = store
            .resolve_software(&program("Firefox", "128.0", None))
            .await
            .unwrap();
        store
            .insert_software_vulnerability(&SoftwareVulnerabilityRow {
                software_id: firefox_128.software_id,
                cve: "CVE-2024-0001".to_string(),
                source: "nvd".to_string(),
                resolved_in_version: Some("128.1".to_string()),
                created_at: now,
            })
            .await
            .unwrap();
        // Second insert is ignored.
        let again = store
            .insert_software_vulnerability(&SoftwareVulnerabilityRow {
                software_id: firefox_128.software_id,
                cve: "CVE-2024-0001".to_string(),
                source: "nvd".to_string(),
                resolved_in_version: None,
                created_at: now,
            })
            .await
            .unwrap();
        assert!(!again);

        let os_id = store
            .set_host_operating_system(
                4,
                &OperatingSystemFact {
                    name: "Ubuntu".to_string(),
                    version: "22.04".to_string(),
                    arch: "x86_64".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .insert_os_vulnerability(&OsVulnerabilityRow {
                os_id,
                cve: "CVE-2024-0002".to_string(),
                source: "oval".to_string(),
                resolved_in_version: None,
                created_at: now,
            })
            .await
            .unwrap();

        store
            .upsert_cve_meta(&[CveMetaRow {
                cve: "CVE-2024-0001".to_string(),
                cvss_score: Some(9.8),
                epss_probability: Some(0.5),
                cisa_known_exploit: Some(true),
                published: Some(now),
                description: "heap overflow".to_string(),
            }])
            .await
            .unwrap();

        store.sync_all_counts(now).await.unwrap();

        let (items, total, _) = store
            .list_vulnerabilities(&VulnerabilityListOptions::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].cve, "CVE-2024-0001");
        assert_eq!(items[0].hosts_count, 4);
        assert!(items[0].affects_software);
        assert!(!items[0].affects_os);
        assert_eq!(items[1].cve, "CVE-2024-0002");
        assert_eq!(items[1].hosts_count, 1);
        assert!(items[1].affects_os);
        assert!(items[1].description.is_none());

        let known = VulnerabilityListOptions {
            known_exploit: true,
            ..Default::default()
        };
        let (items, total, _) = store.list_vulnerabilities(&known).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].cvss_score, Some(9.8));

        let detail = store
            .get_vulnerability("CVE-2024-0001", CountScope::Global)
            .await
            .unwrap();
        assert_eq!(detail.software.len(), 1);
        assert_eq!(detail.software[0].version, "128.0");
        assert_eq!(detail.software[0].hosts_count, 4);
        assert_eq!(
            detail.software[0].resolved_in_version.as_deref(),
            Some("128.1")
        );

        let os_detail = store
            .get_vulnerability("CVE-2024-0002", CountScope::NoTeam)
            .await
            .unwrap();
        assert_eq!(os_detail.operating_systems.len(), 1);
        assert_eq!(os_detail.operating_systems[0].name, "Ubuntu");

        // Host 4 has no team, so team 1 is unaffected.
        let err = store
            .get_vulnerability("CVE-2024-0002", CountScope::Team(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)), "got {err:?}");

        // Titles carry their CVEs and can be filtered on them.
        let vulnerable = TitleListOptions {
            vulnerable_only: true,
            ..Default::default()
        };
        let (items, total, _) = store.list_software_titles(&vulnerable).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].vulnerabilities, vec!["CVE-2024-0001".to_string()]);
    })
    .await;
}

#[tokio::test]
async fn test_inventory_validation() {
    run_metadata_test_both(|store| async move {
        let now = OffsetDateTime::now_utc();
        let err = store
            .upsert_team(&canon_metadata::models::TeamRow {
                team_id: 0,
                name: "zero".to_string(),
                created_at: now,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Validation(_)));

        let err = store
            .upsert_host(&canon_metadata::models::HostRow {
                host_id: 10,
                hostname: "bad".to_string(),
                team_id: Some(-1),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Validation(_)));

        add_host(&*store, 10, None).await;
        let host = store.get_host(10).await.unwrap().unwrap();
        assert_eq!(host.hostname, "host-10");
        assert!(store.get_host(11).await.unwrap().is_none());

        let os = OperatingSystemFact {
            name: "macOS".to_string(),
            version: "14.5".to_string(),
            arch: "arm64".to_string(),
        };
        let first = store.set_host_operating_system(10, &os).await.unwrap();
        let second = store.set_host_operating_system(10, &os).await.unwrap();
        assert_eq!(first, second);
        let stored = store.get_host_operating_system(10).await.unwrap().unwrap();
        assert_eq!(stored.name, "macOS");
    })
    .await;
}

use chrono::{TimeZone, Utc};
use integrity_common::models::{BackendId, DocumentId, DocumentRef, SearchHit, SourceKind, Version};
use integrity_search::router::is_duplicate;
use integrity_search::MergePolicy;
use proptest::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;

fn arb_hit() -> impl Strategy<Value = SearchHit> {
    (
        prop_oneof![Just("livelink"), Just("index"), Just("archive")],
        0u32..40,
        prop_oneof![Just("Acme IDD"), Just("acme idd.pdf"), Just("Globex memo"), Just("Initech review")],
        1u32..28,
        0u32..=100,
        proptest::collection::vec(prop_oneof![Just("Acme Corp"), Just("Globex Ltd")], 0..2),
    )
        .prop_map(|(backend, id, title, day, score, parties)| {
            let ts = Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap();
            let source = if backend == "livelink" {
                SourceKind::RealTime
            } else {
                SourceKind::Synced
            };
            SearchHit {
                document: DocumentRef {
                    id: DocumentId::new(backend, id.to_string()),
                    name: title.to_string(),
                    content_type: "text/plain".to_string(),
                    version: Version(1),
                    created_at: ts,
                    modified_at: ts,
                    source,
                    categories: vec![],
                    parties: parties.into_iter().map(str::to_string).collect(),
                },
                score: score as f32 / 100.0,
                snippet: String::new(),
                backend: BackendId::new(backend),
            }
        })
}

fn policy() -> MergePolicy {
    let mut priorities = HashMap::new();
    priorities.insert(BackendId::new("livelink"), 0);
    priorities.insert(BackendId::new("index"), 10);
    priorities.insert(BackendId::new("archive"), 20);
    MergePolicy { priorities, min_score: 0.0 }
}

proptest! {
    #[test]
    fn prop_merged_hits_are_ranked(hits in proptest::collection::vec(arb_hit(), 0..30)) {
        let policy = policy();
        let merged = policy.merge(hits, 20);
        for pair in merged.windows(2) {
            prop_assert_ne!(policy.compare(&pair[0], &pair[1]), Ordering::Greater);
            prop_assert!(pair[0].document.modified_at >= pair[1].document.modified_at);
        }
    }

    #[test]
    fn prop_merged_hits_have_no_duplicates(hits in proptest::collection::vec(arb_hit(), 0..30)) {
        let merged = policy().merge(hits, 30);
        for (i, a) in merged.iter().enumerate() {
            for b in merged.iter().skip(i + 1) {
                prop_assert!(!is_duplicate(a, b));
            }
        }
    }

    #[test]
    fn prop_merge_is_order_independent(hits in proptest::collection::vec(arb_hit(), 0..20)) {
        let policy = policy();
        // one hit per document id, so the ranking is a strict order
        let mut seen = std::collections::HashSet::new();
        let hits: Vec<SearchHit> = hits.into_iter().filter(|h| seen.insert(h.document.id.clone())).collect();
        let forward = policy.merge(hits.clone(), 20);
        let mut reversed_input = hits;
        reversed_input.reverse();
        let reversed = policy.merge(reversed_input, 20);
        let ids = |v: &[SearchHit]| v.iter().map(|h| h.document.id.clone()).collect::<Vec<_>>();
        prop_assert_eq!(ids(&forward), ids(&reversed));
    }

    #[test]
    fn prop_top_k_is_respected(hits in proptest::collection::vec(arb_hit(), 0..30), k in 0usize..10) {
        prop_assert!(policy().merge(hits, k).len() <= k);
    }
}

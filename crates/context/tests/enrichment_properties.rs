use integrity_common::config::Vocabulary;
use integrity_common::models::{DocumentId, Version};
use integrity_context::Enricher;
use proptest::prelude::*;

fn arb_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("OCCO assessed Acme Corp in December 2023.".to_string()),
        Just("Director: Jane Smith".to_string()),
        Just("Concern identified: sanctions exposure.".to_string()),
        Just("Concerns: none noted.".to_string()),
        Just("Globex Ltd (supplier) delivered the goods.".to_string()),
        Just("The bribery allegation was mitigated by a new compliance officer.".to_string()),
        Just("Risk rating: Medium".to_string()),
        Just("Overall this is a high risk engagement.".to_string()),
        Just("\u{000C}".to_string()),
        "[a-zA-Z ,.]{0,40}",
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(arb_line(), 0..12).prop_map(|lines| lines.join("\n"))
}

proptest! {
    #[test]
    fn extraction_is_idempotent(text in arb_text()) {
        let enricher = Enricher::deterministic(Vocabulary::default());
        let id = DocumentId::new("index", "doc");
        let first = enricher.extract(&id, Version(3), &text);
        let second = enricher.extract(&id, Version(3), &text);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn provenance_points_into_the_text(text in arb_text()) {
        let enricher = Enricher::deterministic(Vocabulary::default());
        let id = DocumentId::new("index", "doc");
        let entities = enricher.extract(&id, Version(1), &text);

        let spans = entities
            .parties
            .iter()
            .map(|p| &p.provenance)
            .chain(entities.concerns.iter().map(|c| &c.provenance))
            .chain(entities.roles.iter().map(|r| &r.provenance))
            .chain(entities.mitigating_factors.iter().map(|m| &m.provenance));
        for provenance in spans {
            prop_assert_eq!(&provenance.document, &id);
            prop_assert_eq!(provenance.version, Version(1));
            prop_assert!(provenance.start <= provenance.end);
            prop_assert!(provenance.end <= text.len());
            prop_assert!(text.is_char_boundary(provenance.start));
            prop_assert!(text.is_char_boundary(provenance.end));
        }

        for party in &entities.parties {
            let span = &text[party.provenance.start..party.provenance.end];
            prop_assert!(span.eq_ignore_ascii_case(&party.value));
        }
    }
}

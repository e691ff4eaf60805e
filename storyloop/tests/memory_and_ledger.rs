//! Rolling summary normalization and event ledger behavior through the public API.

use storyloop::core::compress::compress_memory;
use storyloop::core::memory::{
    LONG_TERM_HEADING, LegacySplit, MID_TERM_HEADING, RECENT_HEADING, format_rolling_summary_memory,
    normalize_rolling_summary, parse_rolling_summary_memory,
};
use storyloop::core::timeline::{EventStatus, EventType, IngestOutcome, TimelineLedger};
use storyloop::io::report::{read_json, write_json};
use storyloop::test_support::{battle_proposal, ledger_fixture, outline_with_goals, roster_fixture};

#[test]
fn canonical_summary_survives_parse_and_format() {
    let text = format!(
        "{LONG_TERM_HEADING}\nRen swore to carry the letter.\n\n{MID_TERM_HEADING}\nThe salt city burned.\n\n{RECENT_HEADING}\nRen reached the river fort.\n"
    );
    let legacy = LegacySplit::default();
    let parsed = parse_rolling_summary_memory(&text, legacy);
    assert_eq!(parsed.long_term, "Ren swore to carry the letter.");
    assert_eq!(parsed.mid_term, "The salt city burned.");
    assert_eq!(parsed.recent, "Ren reached the river fort.");
    assert_eq!(format_rolling_summary_memory(&parsed), normalize_rolling_summary(&text, legacy));
    assert_eq!(format_rolling_summary_memory(&parsed), text);
}

#[test]
fn legacy_flat_summary_is_split_from_the_tail() {
    let legacy = LegacySplit {
        recent_chars: 10,
        mid_chars: 10,
    };
    let text = "aaaaaaaaaabbbbbbbbbbcccccccccc";
    let memory = parse_rolling_summary_memory(text, legacy);
    assert_eq!(memory.long_term, "aaaaaaaaaa");
    assert_eq!(memory.mid_term, "bbbbbbbbbb");
    assert_eq!(memory.recent, "cccccccccc");

    let short = parse_rolling_summary_memory("Ren slept.", LegacySplit::default());
    assert_eq!(short.recent, "Ren slept.");
    assert!(short.long_term.is_empty());
    assert!(short.mid_term.is_empty());
}

#[test]
fn compressed_summary_fits_budget_and_keeps_newest_recent_sentence() {
    let text = format!(
        "{LONG_TERM_HEADING}\n{}\n{MID_TERM_HEADING}\n{}\n{RECENT_HEADING}\n{}Ren crossed the last bridge.\n",
        "The empire fell. ".repeat(20),
        "Mara paid the debt. ".repeat(20),
        "Ren kept walking. ".repeat(20),
    );
    let memory = parse_rolling_summary_memory(&text, LegacySplit::default());
    let compressed = compress_memory(&memory, 200);

    assert!(compressed.char_count() <= 200);
    assert!(compressed.long_term.starts_with("The empire fell."));
    assert!(compressed.recent.ends_with("Ren crossed the last bridge."));
}

#[test]
fn identical_proposals_yield_one_entry_in_either_order() {
    let roster = roster_fixture();
    let first = battle_proposal(&["Ren", "Mara"], "Ren and Mara fight the wardens!");
    let mut second = battle_proposal(&["mara", "the courier"], "ren and mara fight the wardens");
    second.event_type = "Battle".to_string();

    for (a, b) in [(&first, &second), (&second, &first)] {
        let mut ledger = TimelineLedger::new();
        assert!(matches!(ledger.ingest(a, 3, &roster), IngestOutcome::Added { .. }));
        assert!(matches!(ledger.ingest(b, 4, &roster), IngestOutcome::Skipped { .. }));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.events()[0].character_ids, vec!["c-mara", "c-ren"]);
    }
}

#[test]
fn retold_battle_is_flagged_as_duplication() {
    let ledger = ledger_fixture();
    let roster = roster_fixture();
    let report = ledger.check_duplication(
        "At dawn Ren moved to strike the guard captain once more.",
        &roster,
        3,
    );
    assert!(report.has_duplication);
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.matches[0].keyword, "strike");
}

#[test]
fn outline_seeding_plans_one_event_per_chapter() {
    let roster = roster_fixture();
    let outline = outline_with_goals(&[
        "Ren fights the guard captain at the gate",
        "Mara travels the coast road alone",
        "",
    ]);
    let mut ledger = TimelineLedger::new();
    assert_eq!(ledger.seed_from_outline(&outline, &roster), 2);
    assert_eq!(ledger.seed_from_outline(&outline, &roster), 0);

    let events = ledger.events();
    assert_eq!(events[0].event_type, EventType::Battle);
    assert_eq!(events[0].character_ids, vec!["c-ren"]);
    assert_eq!(events[0].planned_chapter, Some(1));
    assert_eq!(events[1].event_type, EventType::Journey);
    assert_eq!(events[1].character_ids, vec!["c-mara"]);
    assert!(events.iter().all(|e| e.status == EventStatus::Planned));
    let mara_events: Vec<_> = ledger.involving("c-mara").collect();
    assert_eq!(mara_events.len(), 1);
    assert_eq!(mara_events[0].summary, "Mara travels the coast road alone");
}

#[test]
fn ledger_file_reloads_with_duplicate_detection_intact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.json");
    write_json(&path, &ledger_fixture()).expect("write ledger");

    let reloaded: TimelineLedger = read_json(&path).expect("read ledger");
    assert_eq!(reloaded.len(), 1);
    let report = reloaded.check_duplication("Ren fights the guard captain again.", &roster_fixture(), 3);
    assert!(report.has_duplication);
}

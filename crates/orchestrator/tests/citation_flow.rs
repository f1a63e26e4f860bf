//! Citation lifecycle across multiple assistant turns, exercised through
//! the public coordinator API.

use std::collections::BTreeMap;
use std::sync::Arc;

use tinge_orchestrator::citations::{
    remap_markers, CitationCoordinator, Source, SourceRegistry,
};
use tinge_orchestrator::ui::{UiEvent, UiSink};

fn source(url: &str, title: &str) -> Source {
    Source {
        title: title.into(),
        url: url.into(),
        source: "wikipedia".into(),
        language: "en".into(),
    }
}

fn coordinator() -> (
    CitationCoordinator,
    Arc<SourceRegistry>,
    tokio::sync::mpsc::UnboundedReceiver<UiEvent>,
) {
    let registry = Arc::new(SourceRegistry::new());
    let (ui, rx) = UiSink::channel();
    (CitationCoordinator::new(registry.clone(), ui), registry, rx)
}

#[test]
fn re_citing_a_source_in_a_later_turn_reuses_its_index() {
    let (coordinator, registry, mut rx) = coordinator();
    let barcelona = source("https://en.wikipedia.org/wiki/Barcelona", "Barcelona");

    // Turn 1.
    coordinator.on_search_started();
    coordinator.on_search_result(vec![(1, barcelona.clone())]);
    let streamed = coordinator.on_streaming_delta("Barcelona is a city [1].");
    assert_eq!(streamed, "Barcelona is a city [1].");
    let turn1 = coordinator.commit("Barcelona is a city [1].");
    assert_eq!(turn1.text, "Barcelona is a city [1].");

    // Turn 2: the same page, retrieved under a different title.
    let retitled = Source {
        title: "Barcelona (city)".into(),
        ..barcelona
    };
    coordinator.on_search_started();
    coordinator.on_search_result(vec![(1, retitled)]);
    let turn2 = coordinator.commit("Its architecture [1].");
    assert_eq!(turn2.text, "Its architecture [1].");

    // The panel did not grow.
    assert_eq!(registry.len(), 1);
    assert_eq!(turn2.panel.len(), 1);
    assert_eq!(turn2.panel[0].display_index, 1);

    // Panel updates were emitted for both commits.
    let mut panel_updates = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, UiEvent::SourcePanelUpdated { .. }) {
            panel_updates += 1;
        }
    }
    assert_eq!(panel_updates, 2);
}

#[test]
fn local_indexes_remap_onto_global_numbering() {
    let (coordinator, _registry, _rx) = coordinator();

    // Turn 1 registers A as display index 1.
    coordinator.on_search_started();
    coordinator.on_search_result(vec![(1, source("https://a.example", "A"))]);
    coordinator.commit("Primero [1].");

    // Turn 2 cites B (new, local 1) and A (known, local 2).
    coordinator.on_search_started();
    coordinator.on_search_result(vec![
        (1, source("https://b.example", "B")),
        (2, source("https://a.example", "A")),
    ]);
    let streamed = coordinator.on_streaming_delta("Según (1) y source #2, es así.");
    assert_eq!(streamed, "Según [2] y [1], es así.");
    let committed = coordinator.commit("Según (1) y source #2, es así.");
    assert_eq!(committed.text, "Según [2] y [1], es así.");
}

#[test]
fn remap_markers_is_idempotent() {
    let mut map = BTreeMap::new();
    map.insert(1, 3);
    map.insert(2, 7);
    let text = "ver [1], luego (2), y fuente #1 otra vez";
    let once = remap_markers(text, &map);
    assert_eq!(once, "ver [3], luego [7], y [3] otra vez");
    assert_eq!(remap_markers(&once, &map), once);
}

#[test]
fn markerless_turn_appends_only_panel_known_indexes() {
    let (coordinator, registry, _rx) = coordinator();
    let known = source("https://a.example", "A");
    registry.get_or_assign(&known);

    coordinator.on_search_started();
    coordinator.on_search_result(vec![
        (1, known),
        (2, source("https://never-cited.example", "N")),
    ]);
    let committed = coordinator.commit("Respuesta sin marcadores.");
    assert_eq!(committed.text, "Respuesta sin marcadores. [1]");
}

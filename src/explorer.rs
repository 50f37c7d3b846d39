//! Endpoint explorer: filter + selection state over a spec snapshot.
//!
//! The state machine is pure. [`transition`] looks the `(phase, event)`
//! pair up in [`TRANSITIONS`] and applies the listed rule, so the table can
//! be inspected and tested without any front end.

use crate::spec::{EndpointTag, NormalizedEndpoint, NormalizedSpec};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    All,
    Tag(EndpointTag),
}

impl TagFilter {
    pub fn matches(&self, tag: &EndpointTag) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::Tag(wanted) => wanted == tag,
        }
    }
}

/// Endpoints matching `tag` whose summary or path contains `search`, case-insensitively.
pub fn filter_endpoints<'a>(
    endpoints: &'a [NormalizedEndpoint],
    tag: &TagFilter,
    search: &str,
) -> Vec<&'a NormalizedEndpoint> {
    let needle = search.to_lowercase();
    endpoints
        .iter()
        .filter(|e| tag.matches(&e.tag))
        .filter(|e| {
            needle.is_empty()
                || e.summary.to_lowercase().contains(&needle)
                || e.path.to_lowercase().contains(&needle)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorerState {
    Browsing,
    EndpointSelected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Browsing,
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorerEvent {
    Select(String),
    SetTag(TagFilter),
    SetSearch(String),
    ClearSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Select,
    SetTag,
    SetSearch,
    ClearSelection,
}

/// What a transition does to the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Select the event's endpoint if it is visible under the current filter.
    SelectTarget,
    /// Keep the selection if still visible, else move to the first visible endpoint.
    Refilter,
    /// Drop the selection.
    Clear,
}

/// Emitted so a caller can reset views tied to the selection (e.g. the runner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SelectionChanged(Option<String>),
}

pub const TRANSITIONS: &[(Phase, EventKind, Rule)] = &[
    (Phase::Browsing, EventKind::Select, Rule::SelectTarget),
    (Phase::Browsing, EventKind::SetTag, Rule::Refilter),
    (Phase::Browsing, EventKind::SetSearch, Rule::Refilter),
    (Phase::Browsing, EventKind::ClearSelection, Rule::Clear),
    (Phase::Selected, EventKind::Select, Rule::SelectTarget),
    (Phase::Selected, EventKind::SetTag, Rule::Refilter),
    (Phase::Selected, EventKind::SetSearch, Rule::Refilter),
    (Phase::Selected, EventKind::ClearSelection, Rule::Clear),
];

impl ExplorerState {
    pub fn phase(&self) -> Phase {
        match self {
            ExplorerState::Browsing => Phase::Browsing,
            ExplorerState::EndpointSelected(_) => Phase::Selected,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        match self {
            ExplorerState::Browsing => None,
            ExplorerState::EndpointSelected(id) => Some(id),
        }
    }
}

impl ExplorerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ExplorerEvent::Select(_) => EventKind::Select,
            ExplorerEvent::SetTag(_) => EventKind::SetTag,
            ExplorerEvent::SetSearch(_) => EventKind::SetSearch,
            ExplorerEvent::ClearSelection => EventKind::ClearSelection,
        }
    }
}

pub fn rule_for(phase: Phase, kind: EventKind) -> Option<Rule> {
    TRANSITIONS
        .iter()
        .find(|(p, k, _)| *p == phase && *k == kind)
        .map(|(_, _, rule)| *rule)
}

/// Filter inputs the transition function reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    pub tag: TagFilter,
    pub search: String,
}

impl Default for FilterState {
    fn default() -> Self {
        FilterState {
            tag: TagFilter::All,
            search: String::new(),
        }
    }
}

/// Pure transition: `(state, filter, event)` to the next state, filter, and effects.
pub fn transition(
    endpoints: &[NormalizedEndpoint],
    state: &ExplorerState,
    filter: &FilterState,
    event: &ExplorerEvent,
) -> (ExplorerState, FilterState, Vec<Effect>) {
    let mut next_filter = filter.clone();
    match event {
        ExplorerEvent::SetTag(tag) => next_filter.tag = tag.clone(),
        ExplorerEvent::SetSearch(search) => next_filter.search = search.clone(),
        ExplorerEvent::Select(_) | ExplorerEvent::ClearSelection => {}
    }

    let Some(rule) = rule_for(state.phase(), event.kind()) else {
        return (state.clone(), next_filter, Vec::new());
    };
    let visible = filter_endpoints(endpoints, &next_filter.tag, &next_filter.search);

    let next_state = match (rule, event) {
        (Rule::SelectTarget, ExplorerEvent::Select(id)) => {
            if visible.iter().any(|e| e.id == *id) {
                ExplorerState::EndpointSelected(id.clone())
            } else {
                state.clone()
            }
        }
        (Rule::Refilter, _) => match state.selected() {
            Some(id) if visible.iter().any(|e| e.id == id) => state.clone(),
            _ => visible
                .first()
                .map(|e| ExplorerState::EndpointSelected(e.id.clone()))
                .unwrap_or(ExplorerState::Browsing),
        },
        (Rule::Clear, _) => ExplorerState::Browsing,
        _ => state.clone(),
    };

    let effects = if next_state.selected() != state.selected() {
        vec![Effect::SelectionChanged(next_state.selected().map(str::to_string))]
    } else {
        Vec::new()
    };
    (next_state, next_filter, effects)
}

/// Explorer bound to one spec snapshot.
#[derive(Debug, Clone)]
pub struct EndpointExplorer {
    spec: Arc<NormalizedSpec>,
    state: ExplorerState,
    filter: FilterState,
}

impl EndpointExplorer {
    pub fn new(spec: Arc<NormalizedSpec>) -> Self {
        EndpointExplorer {
            spec,
            state: ExplorerState::Browsing,
            filter: FilterState::default(),
        }
    }

    pub fn dispatch(&mut self, event: ExplorerEvent) -> Vec<Effect> {
        let (state, filter, effects) = transition(&self.spec.endpoints, &self.state, &self.filter, &event);
        self.state = state;
        self.filter = filter;
        effects
    }

    pub fn state(&self) -> &ExplorerState {
        &self.state
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn visible(&self) -> Vec<&NormalizedEndpoint> {
        filter_endpoints(&self.spec.endpoints, &self.filter.tag, &self.filter.search)
    }

    pub fn selected(&self) -> Option<&NormalizedEndpoint> {
        self.state.selected().and_then(|id| self.spec.endpoint(id))
    }

    /// Swap in a freshly loaded snapshot; the selection survives only if it still exists.
    pub fn replace_spec(&mut self, spec: Arc<NormalizedSpec>) -> Vec<Effect> {
        self.spec = spec;
        let filter_event = ExplorerEvent::SetSearch(self.filter.search.clone());
        self.dispatch(filter_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::normalize;
    use serde_json::json;

    fn spec() -> Arc<NormalizedSpec> {
        Arc::new(
            normalize(&json!({"paths": {
                "/books": {"get": {"tags": ["books"], "summary": "List books"}},
                "/books/{id}": {"get": {"tags": ["books"], "summary": "Get book"}},
                "/readers": {"get": {"tags": ["readers"], "summary": "List readers"}},
                "/ping": {"get": {"summary": "Health"}}
            }}))
            .unwrap(),
        )
    }

    fn books() -> TagFilter {
        TagFilter::Tag(EndpointTag::Named("books".to_string()))
    }

    #[test]
    fn every_phase_handles_every_event() {
        for phase in [Phase::Browsing, Phase::Selected] {
            for kind in [EventKind::Select, EventKind::SetTag, EventKind::SetSearch, EventKind::ClearSelection] {
                assert!(rule_for(phase, kind).is_some(), "{phase:?} x {kind:?}");
            }
        }
    }

    #[test]
    fn filter_properties_hold() {
        let spec = spec();
        let cases = [
            (TagFilter::All, ""),
            (books(), "LIST"),
            (TagFilter::All, "read"),
            (books(), "{id}"),
            (TagFilter::All, "books "),
        ];
        for (tag, search) in cases {
            let result = filter_endpoints(&spec.endpoints, &tag, search);
            for e in &result {
                assert!(spec.endpoints.contains(e));
                assert!(tag.matches(&e.tag));
                let needle = search.to_lowercase();
                assert!(e.summary.to_lowercase().contains(&needle) || e.path.to_lowercase().contains(&needle));
            }
        }
        assert_eq!(filter_endpoints(&spec.endpoints, &books(), "list").len(), 1);
        assert!(filter_endpoints(&spec.endpoints, &TagFilter::All, "books ").is_empty());
    }

    #[test]
    fn select_moves_to_selected() {
        let mut explorer = EndpointExplorer::new(spec());
        let effects = explorer.dispatch(ExplorerEvent::Select("GET /readers".to_string()));
        assert_eq!(explorer.state(), &ExplorerState::EndpointSelected("GET /readers".to_string()));
        assert_eq!(effects, vec![Effect::SelectionChanged(Some("GET /readers".to_string()))]);
    }

    #[test]
    fn refilter_resets_selection_outside_filter() {
        let mut explorer = EndpointExplorer::new(spec());
        explorer.dispatch(ExplorerEvent::Select("GET /readers".to_string()));
        explorer.dispatch(ExplorerEvent::SetTag(books()));
        assert_eq!(explorer.selected().unwrap().id, "GET /books");

        explorer.dispatch(ExplorerEvent::SetSearch("get book".to_string()));
        assert_eq!(explorer.selected().unwrap().id, "GET /books/{id}");

        explorer.dispatch(ExplorerEvent::SetSearch("nothing matches".to_string()));
        assert_eq!(explorer.state(), &ExplorerState::Browsing);
    }

    #[test]
    fn refilter_keeps_visible_selection() {
        let mut explorer = EndpointExplorer::new(spec());
        explorer.dispatch(ExplorerEvent::Select("GET /books/{id}".to_string()));
        let effects = explorer.dispatch(ExplorerEvent::SetTag(books()));
        assert!(effects.is_empty());
        assert_eq!(explorer.selected().unwrap().id, "GET /books/{id}");
    }

    #[test]
    fn untagged_filter_does_not_match_named_default() {
        let mut explorer = EndpointExplorer::new(spec());
        explorer.dispatch(ExplorerEvent::SetTag(TagFilter::Tag(EndpointTag::Untagged)));
        let ids: Vec<&str> = explorer.visible().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["GET /ping"]);
        explorer.dispatch(ExplorerEvent::SetTag(TagFilter::Tag(EndpointTag::Named("default".into()))));
        assert!(explorer.visible().is_empty());
    }
}

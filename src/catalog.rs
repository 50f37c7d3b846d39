/*!
    Resource catalog: endpoints grouped by tag, with CRUD capabilities
    inferred from method + path shape.

    A trailing segment counts as an item id only when it is a path
    placeholder (`{id}`, `{bookId}`, ...). Literal segments such as
    `/books/recommendations` are never treated as ids, so they cannot be
    mistaken for get-by-id.
*/

use crate::schema::SchemaDictionary;
use crate::spec::{EndpointTag, HttpMethod, NormalizedEndpoint};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::List,
        Capability::Get,
        Capability::Create,
        Capability::Update,
        Capability::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::List => "list",
            Capability::Get => "get",
            Capability::Create => "create",
            Capability::Update => "update",
            Capability::Delete => "delete",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint bound to a capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityBinding {
    pub capability: Capability,
    pub endpoint_id: String,
    /// Placeholder name of the trailing id segment, for item operations.
    pub id_param: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub tag: EndpointTag,
    pub display_name: String,
    /// Collection path the capabilities were inferred against.
    pub base_path: Option<String>,
    pub endpoints: Vec<NormalizedEndpoint>,
    pub capabilities: Vec<CapabilityBinding>,
    pub schema_name: Option<String>,
    pub schema: Option<Value>,
}

impl ResourceDescriptor {
    pub fn binding(&self, capability: Capability) -> Option<&CapabilityBinding> {
        self.capabilities.iter().find(|b| b.capability == capability)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.binding(capability).is_some()
    }

    pub fn endpoint(&self, id: &str) -> Option<&NormalizedEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }
}

/// Group endpoints by tag, preserving first-seen tag order.
///
/// `display_names` maps a tag label to the name shown for the resource.
pub fn group_by_tag(
    endpoints: &[NormalizedEndpoint],
    schemas: &SchemaDictionary,
    display_names: &HashMap<String, String>,
) -> Vec<ResourceDescriptor> {
    let mut groups: Vec<(EndpointTag, Vec<NormalizedEndpoint>)> = Vec::new();
    for endpoint in endpoints {
        match groups.iter_mut().find(|(tag, _)| *tag == endpoint.tag) {
            Some((_, members)) => members.push(endpoint.clone()),
            None => groups.push((endpoint.tag.clone(), vec![endpoint.clone()])),
        }
    }

    groups
        .into_iter()
        .map(|(tag, members)| {
            let base_path = base_path(&members);
            let capabilities = base_path
                .as_deref()
                .map(|base| infer_capabilities(base, &members))
                .unwrap_or_default();
            let schema_name = match &tag {
                EndpointTag::Named(name) => match_schema(name, schemas),
                EndpointTag::Untagged => None,
            };
            let schema = schema_name.as_deref().and_then(|n| schemas.get(n)).cloned();
            ResourceDescriptor {
                display_name: display_names
                    .get(tag.label())
                    .cloned()
                    .unwrap_or_else(|| tag.label().to_string()),
                tag,
                base_path,
                endpoints: members,
                capabilities,
                schema_name,
                schema,
            }
        })
        .collect()
}

/// Find a resource by tag label or display name, case-insensitively.
pub fn find_resource<'a>(resources: &'a [ResourceDescriptor], name: &str) -> Option<&'a ResourceDescriptor> {
    resources.iter().find(|r| {
        r.tag.label().eq_ignore_ascii_case(name) || r.display_name.eq_ignore_ascii_case(name)
    })
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

/// Split a path into its collection path and trailing id placeholder, if any.
fn split_item_path(path: &str) -> (String, Option<String>) {
    let segs = segments(path);
    match segs.split_last() {
        Some((last, rest)) => match placeholder(last) {
            Some(name) => (format!("/{}", rest.join("/")), Some(name.to_string())),
            None => (format!("/{}", segs.join("/")), None),
        },
        None => ("/".to_string(), None),
    }
}

/// The collection path most endpoints of the group hang off.
///
/// Ties go to the shorter path, then the lexically smaller one.
fn base_path(members: &[NormalizedEndpoint]) -> Option<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for endpoint in members {
        let (collection, _) = split_item_path(&endpoint.path);
        match counts.iter_mut().find(|(p, _)| *p == collection) {
            Some((_, n)) => *n += 1,
            None => counts.push((collection, 1)),
        }
    }
    counts
        .into_iter()
        .max_by(|(pa, na), (pb, nb)| {
            na.cmp(nb)
                .then_with(|| segments(pb).len().cmp(&segments(pa).len()))
                .then_with(|| pb.cmp(pa))
        })
        .map(|(path, _)| path)
}

fn infer_capabilities(base: &str, members: &[NormalizedEndpoint]) -> Vec<CapabilityBinding> {
    let mut bindings: Vec<CapabilityBinding> = Vec::new();
    for endpoint in members {
        let (collection, id_param) = split_item_path(&endpoint.path);
        if collection != base {
            continue;
        }
        let capability = match (endpoint.method, id_param.is_some()) {
            (HttpMethod::Get, false) => Capability::List,
            (HttpMethod::Get, true) => Capability::Get,
            (HttpMethod::Post, false) => Capability::Create,
            (HttpMethod::Put, true) | (HttpMethod::Patch, true) => Capability::Update,
            (HttpMethod::Delete, true) => Capability::Delete,
            _ => continue,
        };
        // first match wins; PUT before PATCH follows document order
        if bindings.iter().any(|b| b.capability == capability) {
            continue;
        }
        bindings.push(CapabilityBinding {
            capability,
            endpoint_id: endpoint.id.clone(),
            id_param,
        });
    }
    bindings.sort_by_key(|b| Capability::ALL.iter().position(|c| *c == b.capability));
    bindings
}

/// Map a tag name to a schema key: exact, case-insensitive, then singular forms.
pub fn match_schema(tag: &str, schemas: &SchemaDictionary) -> Option<String> {
    let mut candidates = vec![tag.to_string()];
    candidates.extend(singular_forms(tag));
    for candidate in &candidates {
        if schemas.get(candidate).is_some() {
            return Some(candidate.clone());
        }
    }
    for candidate in &candidates {
        if let Some(name) = schemas.names().find(|n| n.eq_ignore_ascii_case(candidate)) {
            return Some(name.to_string());
        }
    }
    None
}

fn singular_forms(word: &str) -> Vec<String> {
    let mut forms = Vec::new();
    if let Some(stem) = word.strip_suffix("ies") {
        forms.push(format!("{stem}y"));
    }
    if let Some(stem) = word.strip_suffix("es") {
        forms.push(stem.to_string());
    }
    if let Some(stem) = word.strip_suffix('s') {
        forms.push(stem.to_string());
    }
    forms
}

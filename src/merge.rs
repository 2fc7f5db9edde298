//! Merge Module for Classfile Compiler
//!
//! Interleaves a template with its ordered instances into one declaration
//! sequence:
//!
//! 1. Template declarations in document order, marker constants removed.
//! 2. Each instance's declarations in caller order; `GopClass` overrides are
//!    recorded, not emitted.
//! 3. A single `const GopClass = "..."` carrying the winning value, placed
//!    where the winning declaration sat.
//!
//! Functions are tagged with their implicit receiver so later stages never
//! have to rediscover it. No names are resolved here.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::markers::{ClassfileMarkers, Marker, MarkerTable};
use crate::validate::{
    quote_go_string, DeclKind, Declaration, ImportSpec, SourceLocation, SourceUnit, ValueSpec,
};

// ═══════════════════════════════════════════════════════════════════════════════
// MERGED PACKAGE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Implicit receiver a free function is compiled against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverBinding {
    pub receiver: String,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedItem {
    pub decl: Declaration,
    /// Path of the source unit that contributed this item.
    pub origin: String,
    pub receiver: Option<ReceiverBinding>,
    /// True for the resolved `GopClass` constant.
    #[serde(default)]
    pub synthesized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPackage {
    pub name: String,
    /// Template markers with `class_name` replaced by the winning override.
    pub markers: ClassfileMarkers,
    pub template_path: String,
    /// Every import spec of the project, template first.
    pub imports: Vec<ImportSpec>,
    pub items: Vec<MergedItem>,
}

impl MergedPackage {
    pub fn functions(&self) -> impl Iterator<Item = &MergedItem> {
        self.items.iter().filter(|i| i.decl.kind == DeclKind::Func)
    }

    pub fn marker_item(&self) -> Option<&MergedItem> {
        self.items.iter().find(|i| i.synthesized)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKER STRIPPING
// ═══════════════════════════════════════════════════════════════════════════════

struct Stripped {
    class_name: Option<String>,
    /// Non-marker specs declared before the class marker.
    before: Option<Declaration>,
    /// Non-marker specs declared after it, or all of them when the block has
    /// no class marker.
    after: Option<Declaration>,
}

/// Splits marker specs out of a const block. `None` when the block has none.
fn strip_markers(decl: &Declaration) -> Option<Stripped> {
    if decl.kind != DeclKind::Const {
        return None;
    }
    if !decl.specs.iter().any(|s| Marker::from_ident(&s.name).is_some()) {
        return None;
    }

    let class_index = decl
        .specs
        .iter()
        .rposition(|s| s.name == Marker::ClassName.ident());
    let class_name = class_index
        .and_then(|i| decl.specs[i].string_literal())
        .filter(|v| !v.is_empty());
    let split = class_index.unwrap_or(0);

    let block = |range: &[ValueSpec]| {
        let rest: Vec<ValueSpec> = range
            .iter()
            .filter(|s| Marker::from_ident(&s.name).is_none())
            .cloned()
            .collect();
        if rest.is_empty() {
            None
        } else {
            Some(Declaration::value_block(DeclKind::Const, rest, decl.location.clone()))
        }
    };
    Some(Stripped {
        class_name,
        before: block(&decl.specs[..split]),
        after: block(&decl.specs[split..]),
    })
}

struct MarkerSlot {
    index: usize,
    origin: String,
    location: SourceLocation,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MERGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Merges a validated template and its instances.
///
/// The output is a pure function of the inputs: same units in the same order
/// always yield the same package.
pub fn merge(
    package_name: &str,
    template: &SourceUnit,
    instances: &[SourceUnit],
    markers: &ClassfileMarkers,
) -> MergedPackage {
    let mut items: Vec<MergedItem> = Vec::new();
    let mut class_name = markers.class_name.clone();
    let mut slot: Option<MarkerSlot> = None;

    let template_binding = ReceiverBinding {
        receiver: markers.this_name.clone(),
        class_name: markers.class_name.clone(),
    };
    append_unit(
        template,
        &template_binding,
        &mut items,
        &mut slot,
        &mut class_name,
    );

    for instance in instances {
        let own_class = MarkerTable::build(instance)
            .get(Marker::ClassName)
            .map(str::to_string)
            .unwrap_or_else(|| markers.class_name.clone());
        let binding = ReceiverBinding {
            receiver: markers.this_name.clone(),
            class_name: own_class,
        };
        append_unit(instance, &binding, &mut items, &mut slot, &mut class_name);
    }

    if let Some(slot) = slot {
        debug!(class = %class_name, origin = %slot.origin, index = slot.index, "placing class marker");
        let quoted = quote_go_string(&class_name);
        let decl = Declaration::value_block(
            DeclKind::Const,
            vec![ValueSpec::new(Marker::ClassName.ident(), Some(quoted.as_str()))],
            slot.location,
        );
        let index = slot.index.min(items.len());
        items.insert(
            index,
            MergedItem {
                decl,
                origin: slot.origin,
                receiver: None,
                synthesized: true,
            },
        );
    }

    let imports = std::iter::once(template)
        .chain(instances)
        .flat_map(|u| u.imports.iter().cloned())
        .collect();

    MergedPackage {
        name: package_name.to_string(),
        markers: ClassfileMarkers {
            class_name,
            ..markers.clone()
        },
        template_path: template.path.clone(),
        imports,
        items,
    }
}

fn append_unit(
    unit: &SourceUnit,
    binding: &ReceiverBinding,
    items: &mut Vec<MergedItem>,
    slot: &mut Option<MarkerSlot>,
    class_name: &mut String,
) {
    for decl in &unit.decls {
        let Some(stripped) = strip_markers(decl) else {
            items.push(MergedItem {
                receiver: receiver_for(decl, binding),
                decl: decl.clone(),
                origin: unit.path.clone(),
                synthesized: false,
            });
            continue;
        };

        let remainder = |decl: Declaration| MergedItem {
            decl,
            origin: unit.path.clone(),
            receiver: None,
            synthesized: false,
        };
        items.extend(stripped.before.map(remainder));
        if let Some(value) = stripped.class_name {
            *class_name = value;
            *slot = Some(MarkerSlot {
                index: items.len(),
                origin: unit.path.clone(),
                location: decl.location.clone(),
            });
        }
        items.extend(stripped.after.map(remainder));
    }
}

/// Free functions bind to the class receiver; explicit methods keep theirs.
fn receiver_for(decl: &Declaration, binding: &ReceiverBinding) -> Option<ReceiverBinding> {
    if decl.kind == DeclKind::Func && !decl.is_method() {
        Some(binding.clone())
    } else {
        None
    }
}

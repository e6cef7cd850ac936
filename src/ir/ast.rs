//! Model data structures: the flattened component tree as delivered by the
//! front end, stored in an arena addressed by stable indices.
//!
//! The front end serializes the model as a nested JSON tree
//! ([`ComponentDecl`]); [`ModelArena::from_decl`] flattens it into an arena
//! so that analysis passes can hold cross-references between parents and
//! children by [`CompId`] without ownership cycles.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ir::expr::Expr;

/// Stable index of a component within a [`ModelArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Exactly one instance ever exists.
    Singleton,
    /// Zero or more instances, explicitly counted.
    Population,
    /// An edge type; cardinality derives from its bindings.
    Connection,
}

/// Combining operation applied when a variable's equation fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combiner {
    Replace,
    Add,
    Mul,
    Div,
    Min,
    Max,
    /// Never combined; storage-only (externally driven or structural).
    Noop,
}

impl Combiner {
    /// Identity element used to clear a shadow accumulator at phase start.
    /// Replace/Noop have none; the shadow carries the old value forward.
    pub fn identity(&self) -> Option<f64> {
        match self {
            Combiner::Add => Some(0.0),
            Combiner::Mul | Combiner::Div => Some(1.0),
            Combiner::Min => Some(f64::INFINITY),
            Combiner::Max => Some(f64::NEG_INFINITY),
            Combiner::Replace | Combiner::Noop => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Combiner::Noop)
    }

    /// Fold one partial write into an accumulator. Mirrors the semantics of
    /// the emitted combine statements; used by tests to check the buffering
    /// round-trip.
    pub fn apply(&self, acc: f64, value: f64) -> f64 {
        match self {
            Combiner::Replace | Combiner::Noop => value,
            Combiner::Add => acc + value,
            Combiner::Mul => acc * value,
            Combiner::Div => acc / value,
            Combiner::Min => acc.min(value),
            Combiner::Max => acc.max(value),
        }
    }
}

/// Attribute tags assigned by the front end. An explicit struct of named
/// booleans rather than a tag set, so classification rules read as plain
/// boolean expressions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarTags {
    pub constant: bool,
    pub temporary: bool,
    pub init_only: bool,
    /// Population-level rather than per-instance.
    pub global: bool,
    /// Points at another component's variable.
    pub reference: bool,
    pub external_read: bool,
    pub external_write: bool,
    /// Previous-step value feeds the current step.
    pub cycle: bool,
    pub dummy: bool,
    /// Built-in storage; never declared by the emitter.
    pub preexistent: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardedEquation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Expr>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// Differentiation order: 0 = value, 1 = first derivative, ...
    #[serde(default)]
    pub order: u8,
    pub combiner: Combiner,
    #[serde(default)]
    pub equations: Vec<GuardedEquation>,
    #[serde(default)]
    pub tags: VarTags,
    /// Power-of-two scale of the fixed-point encoding (fraction bits).
    #[serde(default)]
    pub exponent: i32,
    /// Front-end liveness: false when nothing outside reads this variable.
    #[serde(default = "default_true")]
    pub used: bool,
    /// Index (within the same component) of the order-0 variable this one
    /// is the derivative of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivative_of: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Variable {
    pub fn has_equations(&self) -> bool {
        !self.equations.is_empty()
    }

    /// A dead temporary: storage-free scratch nothing outside ever reads.
    pub fn is_dead_temporary(&self) -> bool {
        self.tags.temporary && !self.used
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Trigger kind of an event target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Fires while the condition is non-zero.
    NonZero,
    Rise,
    Fall,
    Change,
    EveryStep,
}

/// An event target as declared on its owning component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventTargetDecl {
    pub label: String,
    pub trigger: TriggerKind,
    pub condition: Expr,
}

/// An event source edge: this component fires into `target_component`'s
/// target `label` after `delay` (an expression; constant when statically
/// known).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventSourceDecl {
    pub target_component: String,
    pub label: String,
    pub delay: Expr,
}

/// Connection binding as declared: a named reference to another component
/// by dotted path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BindingDecl {
    pub name: String,
    pub target: String,
}

/// Nested component tree as serialized by the front end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub name: String,
    pub kind: ComponentKind,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub bindings: Vec<BindingDecl>,
    #[serde(default)]
    pub metadata: IndexMap<String, MetaValue>,
    #[serde(default)]
    pub event_targets: Vec<EventTargetDecl>,
    #[serde(default)]
    pub event_sources: Vec<EventSourceDecl>,
    #[serde(default)]
    pub children: Vec<ComponentDecl>,
}

/// Resolved connection binding.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub name: String,
    pub target: CompId,
}

/// One arena node. Children are owned by the arena; the tree structure is
/// expressed entirely through ids.
#[derive(Clone, Debug)]
pub struct Component {
    pub id: CompId,
    pub name: String,
    /// Dotted path from the root, used in diagnostics and event references.
    pub path: String,
    pub parent: Option<CompId>,
    pub children: Vec<CompId>,
    pub kind: ComponentKind,
    pub variables: Vec<Variable>,
    /// Binding declarations as received; resolved into `bindings`.
    pub binding_decls: Vec<BindingDecl>,
    pub bindings: Vec<Binding>,
    pub metadata: IndexMap<String, MetaValue>,
    pub event_targets: Vec<EventTargetDecl>,
    pub event_sources: Vec<EventSourceDecl>,
}

impl Component {
    pub fn is_connection(&self) -> bool {
        self.kind == ComponentKind::Connection
    }

    pub fn is_singleton(&self) -> bool {
        self.kind == ComponentKind::Singleton
    }

    pub fn find_var(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn meta_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(MetaValue::as_bool)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetaValue::as_str)
    }
}

/// Arena of components for one compilation run. Built once from the front
/// end's declaration tree, then mutated only through analysis side tables.
#[derive(Clone, Debug, Default)]
pub struct ModelArena {
    pub components: Vec<Component>,
    pub by_path: IndexMap<String, CompId>,
}

impl ModelArena {
    pub fn from_decl(root: &ComponentDecl) -> Self {
        let mut arena = ModelArena::default();
        arena.intern(root, None, "");
        arena
    }

    fn intern(&mut self, decl: &ComponentDecl, parent: Option<CompId>, prefix: &str) -> CompId {
        let id = CompId(self.components.len());
        let path = if prefix.is_empty() {
            decl.name.clone()
        } else {
            format!("{}.{}", prefix, decl.name)
        };
        self.components.push(Component {
            id,
            name: decl.name.clone(),
            path: path.clone(),
            parent,
            children: Vec::new(),
            kind: decl.kind,
            variables: decl.variables.clone(),
            binding_decls: decl.bindings.clone(),
            bindings: Vec::new(),
            metadata: decl.metadata.clone(),
            event_targets: decl.event_targets.clone(),
            event_sources: decl.event_sources.clone(),
        });
        self.by_path.insert(path.clone(), id);
        for child in &decl.children {
            let cid = self.intern(child, Some(id), &path);
            self.components[id.0].children.push(cid);
        }
        id
    }

    pub fn root(&self) -> CompId {
        CompId(0)
    }

    pub fn get(&self, id: CompId) -> &Component {
        &self.components[id.0]
    }

    pub fn get_mut(&mut self, id: CompId) -> &mut Component {
        &mut self.components[id.0]
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn lookup(&self, path: &str) -> Option<CompId> {
        self.by_path.get(path).copied()
    }

    /// Children-first (post-order) id sequence, the traversal order of every
    /// bottom-up analysis pass and of both emission passes.
    pub fn postorder(&self) -> Vec<CompId> {
        let mut order = Vec::with_capacity(self.len());
        self.walk_postorder(self.root(), &mut order);
        order
    }

    fn walk_postorder(&self, id: CompId, order: &mut Vec<CompId>) {
        for &child in &self.get(id).children {
            self.walk_postorder(child, order);
        }
        order.push(id);
    }

    /// Parent-first (pre-order) id sequence, used by top-down rechecks.
    pub fn preorder(&self) -> Vec<CompId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.get(id).children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

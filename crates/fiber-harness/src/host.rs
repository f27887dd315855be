#![forbid(unsafe_code)]

//! An in-memory host that records every operation.
//!
//! [`TestHost`] keeps a small node arena (elements, text nodes and
//! containers) and appends a [`HostOp`] for each call the reconciler makes.
//! Tests assert on the resulting markup ([`TestHost::render`]) or on the
//! exact operation sequence ([`TestHost::ops`]).
//!
//! # Failure injection
//!
//! [`TestHost::fail_on`] makes the next call of a named operation return a
//! [`HostError`], which is how poisoning is exercised.
//!
//! # Hydration
//!
//! [`TestHost::hydrating`] enables hydration support. Pre-existing content is
//! built with [`TestHost::seed_element`] and [`TestHost::seed_text`] before
//! the first render.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use fiber_core::{PropDiff, Props};
use fiber_runtime::{HostBinding, HostError, PortalTarget, RenderError};
use serde::Serialize;

/// Handle to a node of a [`TestHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HostId(u32);

impl HostId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// One recorded host call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOp {
    CreateInstance { id: HostId, tag: String },
    CreateText { id: HostId, text: String },
    AppendInitialChild { parent: HostId, child: HostId },
    AppendChild { parent: HostId, child: HostId },
    InsertBefore { parent: HostId, child: HostId, before: HostId },
    RemoveChild { parent: HostId, child: HostId },
    CommitUpdate { id: HostId, tag: String, diff: PropDiff },
    CommitTextUpdate { id: HostId, text: String },
    CommitMount { id: HostId },
    Hide { id: HostId },
    Unhide { id: HostId },
    PrepareForCommit,
    ResetAfterCommit,
    ClearContainer { id: HostId },
}

impl HostOp {
    /// Operation name as used by [`TestHost::fail_on`].
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateInstance { .. } => "create_instance",
            Self::CreateText { .. } => "create_text_instance",
            Self::AppendInitialChild { .. } => "append_initial_child",
            Self::AppendChild { .. } => "append_child",
            Self::InsertBefore { .. } => "insert_before",
            Self::RemoveChild { .. } => "remove_child",
            Self::CommitUpdate { .. } => "commit_update",
            Self::CommitTextUpdate { .. } => "commit_text_update",
            Self::CommitMount { .. } => "commit_mount",
            Self::Hide { .. } => "hide_instance",
            Self::Unhide { .. } => "unhide_instance",
            Self::PrepareForCommit => "prepare_for_commit",
            Self::ResetAfterCommit => "reset_after_commit",
            Self::ClearContainer { .. } => "clear_container",
        }
    }

    /// Whether the op changes attached host content.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::AppendChild { .. }
                | Self::InsertBefore { .. }
                | Self::RemoveChild { .. }
                | Self::CommitUpdate { .. }
                | Self::CommitTextUpdate { .. }
                | Self::Hide { .. }
                | Self::Unhide { .. }
                | Self::ClearContainer { .. }
        )
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Container(String),
    Element { tag: String, props: Props },
    Text(String),
}

#[derive(Debug, Clone)]
struct HostNode {
    data: NodeData,
    parent: Option<HostId>,
    children: Vec<HostId>,
    hidden: bool,
}

/// Recording host for tests.
#[derive(Debug, Default)]
pub struct TestHost {
    nodes: Vec<HostNode>,
    ops: Vec<HostOp>,
    portals: BTreeMap<String, HostId>,
    fail_on: Option<&'static str>,
    hydration: bool,
    uncaught: Vec<RenderError>,
}

impl TestHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that supports hydrating pre-existing content.
    #[must_use]
    pub fn hydrating() -> Self {
        Self {
            hydration: true,
            ..Self::default()
        }
    }

    fn alloc(&mut self, data: NodeData) -> HostId {
        let id = HostId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(HostNode {
            data,
            parent: None,
            children: Vec::new(),
            hidden: false,
        });
        id
    }

    /// A new, empty container.
    pub fn create_container(&mut self, name: &str) -> HostId {
        self.alloc(NodeData::Container(name.to_owned()))
    }

    /// Make the next call of `operation` fail.
    pub fn fail_on(&mut self, operation: &'static str) {
        self.fail_on = Some(operation);
    }

    fn check(&mut self, operation: &'static str) -> Result<(), HostError> {
        if self.fail_on == Some(operation) {
            self.fail_on = None;
            tracing::debug!(target: "fiber.harness", operation, "injected host failure");
            return Err(HostError::new(operation, "injected failure"));
        }
        Ok(())
    }

    fn node(&self, id: HostId) -> Result<&HostNode, HostError> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| HostError::new("lookup", format!("unknown host node {id}")))
    }

    fn node_mut(&mut self, id: HostId) -> Result<&mut HostNode, HostError> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| HostError::new("lookup", format!("unknown host node {id}")))
    }

    fn detach(&mut self, child: HostId) -> Result<(), HostError> {
        if let Some(parent) = self.node(child)?.parent {
            self.node_mut(parent)?.children.retain(|c| *c != child);
        }
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    // ---- seeding pre-existing content ----

    /// Add an element under `parent` as if it had been server-rendered.
    pub fn seed_element(&mut self, parent: HostId, tag: &str, props: Props) -> HostId {
        let id = self.alloc(NodeData::Element {
            tag: tag.to_owned(),
            props,
        });
        self.link(parent, id);
        id
    }

    /// Add a text node under `parent` as if it had been server-rendered.
    pub fn seed_text(&mut self, parent: HostId, text: &str) -> HostId {
        let id = self.alloc(NodeData::Text(text.to_owned()));
        self.link(parent, id);
        id
    }

    fn link(&mut self, parent: HostId, child: HostId) {
        if let Some(node) = self.nodes.get_mut(child.index()) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(parent.index()) {
            node.children.push(child);
        }
    }

    // ---- inspection ----

    #[must_use]
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Drain the op log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Names of the mutating ops recorded so far.
    #[must_use]
    pub fn mutation_names(&self) -> Vec<&'static str> {
        self.ops
            .iter()
            .filter(|op| op.is_mutation())
            .map(HostOp::name)
            .collect()
    }

    /// The op log as JSON lines.
    #[must_use]
    pub fn ops_jsonl(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            if let Ok(line) = serde_json::to_string(op) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }

    /// Errors reported as uncaught.
    #[must_use]
    pub fn uncaught_errors(&self) -> &[RenderError] {
        &self.uncaught
    }

    #[must_use]
    pub fn children(&self, id: HostId) -> Vec<HostId> {
        self.nodes
            .get(id.index())
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_hidden(&self, id: HostId) -> bool {
        self.nodes.get(id.index()).is_some_and(|n| n.hidden)
    }

    #[must_use]
    pub fn prop(&self, id: HostId, name: &str) -> Option<String> {
        match &self.nodes.get(id.index())?.data {
            NodeData::Element { props, .. } => props.get(name).map(ToString::to_string),
            _ => None,
        }
    }

    /// Container a portal target resolved to, if one was requested.
    #[must_use]
    pub fn portal(&self, name: &str) -> Option<HostId> {
        self.portals.get(name).copied()
    }

    /// Name a container was created with.
    #[must_use]
    pub fn container_name(&self, id: HostId) -> Option<&str> {
        match &self.nodes.get(id.index())?.data {
            NodeData::Container(name) => Some(name),
            _ => None,
        }
    }

    /// Markup of everything below `id`. Hidden nodes render as `<tag hidden>`
    /// (elements) or not at all (text).
    #[must_use]
    pub fn render(&self, id: HostId) -> String {
        let mut out = String::new();
        for &child in &self.children(id) {
            self.render_node(child, &mut out);
        }
        out
    }

    fn render_node(&self, id: HostId, out: &mut String) {
        let Some(node) = self.nodes.get(id.index()) else {
            return;
        };
        match &node.data {
            NodeData::Text(text) => {
                if !node.hidden {
                    out.push_str(text);
                }
            }
            NodeData::Element { tag, props } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in props.iter() {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                if node.hidden {
                    out.push_str(" hidden");
                }
                out.push('>');
                for &child in &node.children {
                    self.render_node(child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
            NodeData::Container(_) => {
                for &child in &node.children {
                    self.render_node(child, out);
                }
            }
        }
    }

    /// Content hash of the markup below `id`.
    #[must_use]
    pub fn checksum(&self, id: HostId) -> String {
        format!("blake3:{}", blake3::hash(self.render(id).as_bytes()).to_hex())
    }
}

impl HostBinding for TestHost {
    type Instance = HostId;

    fn create_instance(&mut self, tag: &str, props: &Props) -> Result<HostId, HostError> {
        self.check("create_instance")?;
        let id = self.alloc(NodeData::Element {
            tag: tag.to_owned(),
            props: props.clone(),
        });
        self.ops.push(HostOp::CreateInstance {
            id,
            tag: tag.to_owned(),
        });
        Ok(id)
    }

    fn create_text_instance(&mut self, text: &str) -> Result<HostId, HostError> {
        self.check("create_text_instance")?;
        let id = self.alloc(NodeData::Text(text.to_owned()));
        self.ops.push(HostOp::CreateText {
            id,
            text: text.to_owned(),
        });
        Ok(id)
    }

    fn append_initial_child(&mut self, parent: &HostId, child: &HostId) -> Result<(), HostError> {
        self.check("append_initial_child")?;
        self.detach(*child)?;
        self.node_mut(*parent)?.children.push(*child);
        self.node_mut(*child)?.parent = Some(*parent);
        self.ops.push(HostOp::AppendInitialChild {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn finalize_initial_children(&mut self, _instance: &HostId, _tag: &str, props: &Props) -> bool {
        props.get("autofocus").is_some()
    }

    fn append_child(&mut self, parent: &HostId, child: &HostId) -> Result<(), HostError> {
        self.check("append_child")?;
        self.detach(*child)?;
        self.node_mut(*parent)?.children.push(*child);
        self.node_mut(*child)?.parent = Some(*parent);
        self.ops.push(HostOp::AppendChild {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: &HostId,
        child: &HostId,
        before: &HostId,
    ) -> Result<(), HostError> {
        self.check("insert_before")?;
        self.detach(*child)?;
        let siblings = &mut self.node_mut(*parent)?.children;
        let Some(at) = siblings.iter().position(|c| c == before) else {
            return Err(HostError::new(
                "insert_before",
                format!("{before} is not a child of {parent}"),
            ));
        };
        siblings.insert(at, *child);
        self.node_mut(*child)?.parent = Some(*parent);
        self.ops.push(HostOp::InsertBefore {
            parent: *parent,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: &HostId, child: &HostId) -> Result<(), HostError> {
        self.check("remove_child")?;
        if self.node(*child)?.parent != Some(*parent) {
            return Err(HostError::new(
                "remove_child",
                format!("{child} is not a child of {parent}"),
            ));
        }
        self.detach(*child)?;
        self.ops.push(HostOp::RemoveChild {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn commit_update(&mut self, instance: &HostId, tag: &str, diff: &PropDiff) -> Result<(), HostError> {
        self.check("commit_update")?;
        if let NodeData::Element { props, .. } = &mut self.node_mut(*instance)?.data {
            props.apply(diff);
        }
        self.ops.push(HostOp::CommitUpdate {
            id: *instance,
            tag: tag.to_owned(),
            diff: diff.clone(),
        });
        Ok(())
    }

    fn commit_text_update(
        &mut self,
        instance: &HostId,
        _old_text: &str,
        new_text: &str,
    ) -> Result<(), HostError> {
        self.check("commit_text_update")?;
        if let NodeData::Text(text) = &mut self.node_mut(*instance)?.data {
            new_text.clone_into(text);
        }
        self.ops.push(HostOp::CommitTextUpdate {
            id: *instance,
            text: new_text.to_owned(),
        });
        Ok(())
    }

    fn commit_mount(&mut self, instance: &HostId, _tag: &str, _props: &Props) -> Result<(), HostError> {
        self.check("commit_mount")?;
        self.ops.push(HostOp::CommitMount { id: *instance });
        Ok(())
    }

    fn hide_instance(&mut self, instance: &HostId) -> Result<(), HostError> {
        self.check("hide_instance")?;
        self.node_mut(*instance)?.hidden = true;
        self.ops.push(HostOp::Hide { id: *instance });
        Ok(())
    }

    fn unhide_instance(&mut self, instance: &HostId) -> Result<(), HostError> {
        self.check("unhide_instance")?;
        self.node_mut(*instance)?.hidden = false;
        self.ops.push(HostOp::Unhide { id: *instance });
        Ok(())
    }

    fn prepare_for_commit(&mut self) -> Result<(), HostError> {
        self.check("prepare_for_commit")?;
        self.ops.push(HostOp::PrepareForCommit);
        Ok(())
    }

    fn reset_after_commit(&mut self) -> Result<(), HostError> {
        self.check("reset_after_commit")?;
        self.ops.push(HostOp::ResetAfterCommit);
        Ok(())
    }

    fn clear_container(&mut self, container: &HostId) -> Result<(), HostError> {
        self.check("clear_container")?;
        for child in self.children(*container) {
            self.detach(child)?;
        }
        self.ops.push(HostOp::ClearContainer { id: *container });
        Ok(())
    }

    fn portal_container(&mut self, target: &PortalTarget) -> Result<HostId, HostError> {
        self.check("portal_container")?;
        if let Some(id) = self.portals.get(target.name()) {
            return Ok(*id);
        }
        let id = self.create_container(target.name());
        self.portals.insert(target.name().to_owned(), id);
        Ok(id)
    }

    fn report_uncaught_error(&mut self, error: &RenderError) {
        self.uncaught.push(error.clone());
    }

    fn supports_hydration(&self) -> bool {
        self.hydration
    }

    fn first_hydratable_child(&self, parent: &HostId) -> Option<HostId> {
        self.nodes.get(parent.index())?.children.first().copied()
    }

    fn next_hydratable_sibling(&self, instance: &HostId) -> Option<HostId> {
        let parent = self.nodes.get(instance.index())?.parent?;
        let siblings = &self.nodes.get(parent.index())?.children;
        let at = siblings.iter().position(|c| c == instance)?;
        siblings.get(at + 1).copied()
    }

    fn can_hydrate_instance(&self, instance: &HostId, tag: &str, _props: &Props) -> bool {
        matches!(
            self.nodes.get(instance.index()).map(|n| &n.data),
            Some(NodeData::Element { tag: existing, .. }) if existing == tag
        )
    }

    fn can_hydrate_text_instance(&self, instance: &HostId, text: &str) -> bool {
        matches!(
            self.nodes.get(instance.index()).map(|n| &n.data),
            Some(NodeData::Text(existing)) if existing == text
        )
    }
}

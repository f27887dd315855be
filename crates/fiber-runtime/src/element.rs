#![forbid(unsafe_code)]

//! Element descriptions: the immutable input a render pass reconciles.
//!
//! Elements are cheap to clone (`Rc` inside). A work node whose new element
//! is pointer-identical to the one it last rendered with can skip rendering.

use std::any::TypeId;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use fiber_core::{PropValue, Props};

use crate::component::{AnyClass, ClassComponent, ClassWrapper, FnComponent, FunctionComponent};
use crate::error::Throw;
use crate::hooks::Hooks;
use crate::store::NodeId;

/// Identity of a child among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self(Rc::from(v))
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Self(Rc::from(v))
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Self(Rc::from(v.to_string()))
    }
}

impl From<usize> for Key {
    fn from(v: usize) -> Self {
        Self(Rc::from(v.to_string()))
    }
}

/// A mutable slot the commit phase fills with the node it is attached to.
#[derive(Clone, Default)]
pub struct ElementRef {
    target: Rc<Cell<Option<NodeId>>>,
}

impl ElementRef {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached node, if any.
    #[must_use]
    pub fn current(&self) -> Option<NodeId> {
        self.target.get()
    }

    pub(crate) fn set(&self, node: Option<NodeId>) {
        self.target.set(node);
    }

    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
    }
}

impl fmt::Debug for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ElementRef").field(&self.target.get()).finish()
    }
}

/// Names a host container outside the main tree that a portal renders into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortalTarget(Rc<str>);

impl PortalTarget {
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Rc::from(name.as_ref()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Identity of a component type.
#[derive(Debug, Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    pub(crate) fn of<T: 'static>(name: &'static str) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

/// What kind of work a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    HostRoot,
    HostElement,
    HostText,
    FunctionComponent,
    ClassComponent,
    Fragment,
    Portal,
    SuspenseBoundary,
    Offscreen,
}

impl WorkKind {
    /// Kinds that own a host instance or container.
    #[must_use]
    pub fn is_host_parent(self) -> bool {
        matches!(self, Self::HostRoot | Self::HostElement | Self::Portal)
    }

    #[must_use]
    pub fn is_host_leaf_or_element(self) -> bool {
        matches!(self, Self::HostElement | Self::HostText)
    }
}

/// The type a node was created for. Reuse across renders requires equality.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    Root,
    Host(Rc<str>),
    Text,
    Function(ComponentType),
    Class(ComponentType),
    Fragment,
    Portal(PortalTarget),
    Suspense,
    Offscreen,
}

impl ElementType {
    #[must_use]
    pub fn kind(&self) -> WorkKind {
        match self {
            Self::Root => WorkKind::HostRoot,
            Self::Host(_) => WorkKind::HostElement,
            Self::Text => WorkKind::HostText,
            Self::Function(_) => WorkKind::FunctionComponent,
            Self::Class(_) => WorkKind::ClassComponent,
            Self::Fragment => WorkKind::Fragment,
            Self::Portal(_) => WorkKind::Portal,
            Self::Suspense => WorkKind::SuspenseBoundary,
            Self::Offscreen => WorkKind::Offscreen,
        }
    }

    /// Display name: the tag for host elements, the component name otherwise.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Root => "#root",
            Self::Host(tag) => tag,
            Self::Text => "#text",
            Self::Function(ty) | Self::Class(ty) => ty.name(),
            Self::Fragment => "#fragment",
            Self::Portal(_) => "#portal",
            Self::Suspense => "Suspense",
            Self::Offscreen => "Offscreen",
        }
    }
}

/// A host element description.
#[derive(Debug, Clone)]
pub struct HostElement {
    pub tag: Rc<str>,
    pub props: Props,
    pub children: Vec<Element>,
    pub node_ref: Option<ElementRef>,
}

/// The payload of an [`Element`].
pub enum ElementNode {
    /// Renders nothing.
    Empty,
    Text(String),
    Host(HostElement),
    Function {
        ty: ComponentType,
        component: Rc<dyn FunctionComponent>,
    },
    Class {
        ty: ComponentType,
        component: Rc<dyn AnyClass>,
    },
    Fragment(Vec<Element>),
    Portal {
        target: PortalTarget,
        children: Vec<Element>,
    },
    Suspense {
        children: Vec<Element>,
        fallback: Vec<Element>,
    },
    Offscreen {
        hidden: bool,
        /// Hidden content is rendered later at the offscreen lane instead
        /// of being left untouched.
        deferred: bool,
        children: Vec<Element>,
    },
}

impl ElementNode {
    #[must_use]
    pub fn element_type(&self) -> Option<ElementType> {
        Some(match self {
            Self::Empty => return None,
            Self::Text(_) => ElementType::Text,
            Self::Host(host) => ElementType::Host(host.tag.clone()),
            Self::Function { ty, .. } => ElementType::Function(*ty),
            Self::Class { ty, .. } => ElementType::Class(*ty),
            Self::Fragment(_) => ElementType::Fragment,
            Self::Portal { target, .. } => ElementType::Portal(target.clone()),
            Self::Suspense { .. } => ElementType::Suspense,
            Self::Offscreen { .. } => ElementType::Offscreen,
        })
    }
}

impl fmt::Debug for ElementNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Host(host) => f
                .debug_struct("Host")
                .field("tag", &host.tag)
                .field("props", &host.props)
                .field("children", &host.children.len())
                .finish(),
            Self::Function { ty, .. } => f.debug_tuple("Function").field(&ty.name()).finish(),
            Self::Class { ty, .. } => f.debug_tuple("Class").field(&ty.name()).finish(),
            Self::Fragment(children) => f.debug_tuple("Fragment").field(&children.len()).finish(),
            Self::Portal { target, children } => f
                .debug_struct("Portal")
                .field("target", target)
                .field("children", &children.len())
                .finish(),
            Self::Suspense { children, fallback } => f
                .debug_struct("Suspense")
                .field("children", &children.len())
                .field("fallback", &fallback.len())
                .finish(),
            Self::Offscreen {
                hidden,
                deferred,
                children,
            } => f
                .debug_struct("Offscreen")
                .field("hidden", hidden)
                .field("deferred", deferred)
                .field("children", &children.len())
                .finish(),
        }
    }
}

/// An immutable, cheaply clonable description of UI.
#[derive(Debug, Clone)]
pub struct Element {
    pub(crate) key: Option<Key>,
    pub(crate) node: Rc<ElementNode>,
}

impl Element {
    fn from_node(node: ElementNode) -> Self {
        Self {
            key: None,
            node: Rc::new(node),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_node(ElementNode::Empty)
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::from_node(ElementNode::Text(text.into()))
    }

    #[must_use]
    pub fn host(tag: &str) -> HostBuilder {
        HostBuilder {
            key: None,
            element: HostElement {
                tag: Rc::from(tag),
                props: Props::new(),
                children: Vec::new(),
                node_ref: None,
            },
        }
    }

    #[must_use]
    pub fn fragment(children: impl IntoIterator<Item = Element>) -> Self {
        Self::from_node(ElementNode::Fragment(children.into_iter().collect()))
    }

    #[must_use]
    pub fn component<C: FunctionComponent>(component: C) -> Self {
        let ty = ComponentType::of::<C>(component.name());
        Self::from_node(ElementNode::Function {
            ty,
            component: Rc::new(component),
        })
    }

    /// A function component backed by a closure. Each closure type is its
    /// own component type.
    #[must_use]
    pub fn render_fn<F>(name: &'static str, render: F) -> Self
    where
        F: Fn(&mut Hooks<'_>) -> Result<Element, Throw> + 'static,
    {
        Self::component(FnComponent::new(name, render))
    }

    #[must_use]
    pub fn class<C: ClassComponent>(component: C) -> Self {
        let ty = ComponentType::of::<C>(component.name());
        Self::from_node(ElementNode::Class {
            ty,
            component: Rc::new(ClassWrapper(component)),
        })
    }

    #[must_use]
    pub fn portal(target: PortalTarget, children: impl IntoIterator<Item = Element>) -> Self {
        Self::from_node(ElementNode::Portal {
            target,
            children: children.into_iter().collect(),
        })
    }

    #[must_use]
    pub fn suspense(
        children: impl IntoIterator<Item = Element>,
        fallback: impl IntoIterator<Item = Element>,
    ) -> Self {
        Self::from_node(ElementNode::Suspense {
            children: children.into_iter().collect(),
            fallback: fallback.into_iter().collect(),
        })
    }

    /// Content that can be hidden. Hidden content is prerendered at the
    /// offscreen lane once more urgent work is done.
    #[must_use]
    pub fn offscreen(hidden: bool, children: impl IntoIterator<Item = Element>) -> Self {
        Self::from_node(ElementNode::Offscreen {
            hidden,
            deferred: true,
            children: children.into_iter().collect(),
        })
    }

    /// Primary content of a suspense boundary. Hidden primary content is
    /// kept as is, never prerendered.
    pub(crate) fn primary(hidden: bool, children: Vec<Element>) -> Self {
        Self::from_node(ElementNode::Offscreen {
            hidden,
            deferred: false,
            children,
        })
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn node(&self) -> &ElementNode {
        &self.node
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(*self.node, ElementNode::Empty)
    }

    /// Whether both elements share the same description.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }
}

impl From<&str> for Element {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Element {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<HostBuilder> for Element {
    fn from(builder: HostBuilder) -> Self {
        builder.build()
    }
}

/// Builder returned by [`Element::host`].
#[derive(Debug, Clone)]
pub struct HostBuilder {
    key: Option<Key>,
    element: HostElement,
}

impl HostBuilder {
    #[must_use]
    pub fn prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.element.props.insert(name, value);
        self
    }

    #[must_use]
    pub fn props(mut self, props: Props) -> Self {
        self.element.props = props;
        self
    }

    #[must_use]
    pub fn child(mut self, child: impl Into<Element>) -> Self {
        self.element.children.push(child.into());
        self
    }

    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.element.children.extend(children);
        self
    }

    #[must_use]
    pub fn node_ref(mut self, node_ref: &ElementRef) -> Self {
        self.element.node_ref = Some(node_ref.clone());
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Element {
        Element {
            key: self.key,
            node: Rc::new(ElementNode::Host(self.element)),
        }
    }
}

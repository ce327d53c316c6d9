//! Logging targets and object-graph debug output.
//!
//! Arbor instruments itself with the `tracing` crate and installs no
//! subscriber. Embedders pick one and filter by the [`targets`] below:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("arbor_core::property=trace,arbor_core=info")
//!     .init();
//! ```
//!
//! [`ObjectTreeDebug`] renders the logical subtree under an object:
//!
//! ```
//! use arbor_core::{DependencyObject, TypeKind};
//! use arbor_core::logging::ObjectTreeDebug;
//!
//! let root = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
//! root.set_name("root").unwrap();
//! let text = ObjectTreeDebug::new().format_subtree(&root);
//! assert!(text.contains("root"));
//! root.unref().unwrap();
//! ```

use std::fmt::Write as _;

use crate::dependency_object::DependencyObject;

/// Target names for log filtering.
pub mod targets {
    /// Crate-wide target.
    pub const CORE: &str = "arbor_core";
    /// Type registry and object lifecycle.
    pub const OBJECT: &str = "arbor_core::object";
    /// Property reads, writes and change fan-out.
    pub const PROPERTY: &str = "arbor_core::property";
    /// Handler registration and emission.
    pub const EVENT: &str = "arbor_core::event";
    /// Collection mutation.
    pub const COLLECTION: &str = "arbor_core::collection";
    /// Name registration.
    pub const NAMESCOPE: &str = "arbor_core::namescope";
    /// Tick-call queues and surfaces.
    pub const TICK: &str = "arbor_core::tick";
    /// Deployment setup and shutdown.
    pub const DEPLOYMENT: &str = "arbor_core::deployment";
}

/// Branch drawing for [`ObjectTreeDebug`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
}

/// Configuration for object tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// Branch drawing.
    pub style: TreeStyle,
    /// Show object ids.
    pub show_ids: bool,
    /// Show the registered type name.
    pub show_types: bool,
    /// List local values under each node.
    pub show_local_values: bool,
    /// Maximum depth to descend into (None for unlimited).
    pub max_depth: Option<usize>,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_types: true,
            show_local_values: false,
            max_depth: None,
        }
    }
}

impl TreeFormatOptions {
    /// Options that also list local values.
    pub fn detailed() -> Self {
        Self {
            show_local_values: true,
            ..Default::default()
        }
    }

    /// Names only.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_types: false,
            ..Default::default()
        }
    }
}

/// Renders the logical subtree of a [`DependencyObject`].
#[derive(Debug, Clone, Default)]
pub struct ObjectTreeDebug {
    options: TreeFormatOptions,
}

impl ObjectTreeDebug {
    /// Visualizer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Visualizer with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Render `root` and its logical descendants.
    pub fn format_subtree(&self, root: &DependencyObject) -> String {
        let mut output = String::new();
        self.format_node(root, "", None, 0, &mut output);
        output
    }

    fn format_node(
        &self,
        obj: &DependencyObject,
        indent: &str,
        is_last: Option<bool>,
        depth: usize,
        out: &mut String,
    ) {
        let (tee, elbow, pipe, blank) = match self.options.style {
            TreeStyle::Ascii => ("+-- ", "`-- ", "|   ", "    "),
            TreeStyle::Unicode => ("\u{251c}\u{2500}\u{2500} ", "\u{2514}\u{2500}\u{2500} ", "\u{2502}   ", "    "),
        };
        let connector = match is_last {
            None => "",
            Some(true) => elbow,
            Some(false) => tee,
        };
        out.push_str(indent);
        out.push_str(connector);
        out.push_str(obj.name().as_deref().unwrap_or("(unnamed)"));
        if self.options.show_types {
            write!(out, " ({})", obj.type_name()).expect("write to String");
        }
        if self.options.show_ids {
            write!(out, " [{}]", obj.id()).expect("write to String");
        }
        if obj.is_disposed() {
            out.push_str(" <disposed>");
        }
        out.push('\n');

        let child_indent = match is_last {
            None => indent.to_string(),
            Some(true) => format!("{indent}{blank}"),
            Some(false) => format!("{indent}{pipe}"),
        };

        if self.options.show_local_values {
            for property in obj.properties(true) {
                if let Ok(Some(value)) = obj.read_local_value(property) {
                    writeln!(out, "{child_indent}  .{} = {value}", property.name()).expect("write to String");
                }
            }
        }

        if self.options.max_depth.is_some_and(|max| depth >= max) {
            return;
        }
        let children = obj.logical_children();
        let count = children.len();
        for (i, child) in children.iter().enumerate() {
            self.format_node(child, &child_indent, Some(i + 1 == count), depth + 1, out);
        }
    }
}

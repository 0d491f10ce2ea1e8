//! # Kiln: metadata-driven object lifecycles for Rust
//!
//! Declare how a type is built, which of its fields and methods take
//! injected values, and which hooks run after construction and before
//! teardown. Kiln drives every instance through the same four phases.
//!
//! ```
//! use kiln::prelude::*;
//!
//! #[derive(Default)]
//! struct Counter {
//!     start: u32,
//! }
//!
//! let engine = Engine::builder()
//!     .declare(
//!         TypeDeclaration::builder::<Counter>()
//!             .default_constructor()
//!             .inject_field("start", |c: &mut Counter, v: u32| c.start = v)
//!             .build(),
//!     )
//!     .value(10u32)
//!     .build()
//!     .unwrap();
//!
//! let counter: Counter = engine.create().unwrap();
//! assert_eq!(counter.start, 10);
//! ```

pub use kiln_core::*;
pub use kiln_support as support;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[derive(Default)]
    struct Widget {
        label: String,
    }

    #[test]
    fn facade_exposes_engine() {
        let engine = Engine::builder()
            .declare(
                TypeDeclaration::builder::<Widget>()
                    .default_constructor()
                    .inject_named_field("label", "widget_label", |w: &mut Widget, v: String| w.label = v)
                    .build(),
            )
            .named_value("widget_label", String::from("alpha"))
            .build()
            .unwrap();

        let widget: Widget = engine.create().unwrap();
        assert_eq!(widget.label, "alpha");
    }

    #[test]
    fn facade_exposes_support() {
        assert_eq!(super::support::rendering::shorten_type_name("a::b::C"), "C");
    }
}

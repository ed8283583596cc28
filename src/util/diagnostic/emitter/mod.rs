//! 诊断渲染

pub mod text;

pub use text::TextEmitter;

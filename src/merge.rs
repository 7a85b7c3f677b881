pub mod merger;
pub mod reconciler;

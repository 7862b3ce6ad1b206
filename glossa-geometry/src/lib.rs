//! # glossa-geometry — Coordinate mapper
//!
//! Converts raw on-screen selection rectangles into resolution-independent
//! page anchors and stored anchors back into pixel overlay rectangles for
//! whatever frame the page is currently rendered at.
//!
//! The document engine (rasterization, text-layer extraction) is an external
//! collaborator: this crate only consumes "the current page's rendered pixel
//! rectangle" as a [`PageViewport`] and produces [`glossa_core::Anchor`]
//! values whose fractions survive any zoom level or container resize.

pub mod mapper;

pub use mapper::{capture, locate_page, project, GeometryError, PageViewport, ScreenRect};

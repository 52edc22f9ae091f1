//! Wavefront path-tracing core.
//!
//! Renders by keeping large queues of in-flight rays, tracing them against
//! the scene in bulk, and shading the hits data-parallel. The integrator
//! family (path tracing, light tracing, bidirectional, SPPM, and VCM)
//! shares one skeleton and differs only in which connection strategies
//! contribute and how they are weighted.

pub mod arena;
pub mod bsdf;
pub mod grid;
pub mod integrator;
pub mod probes;
pub mod queue;
pub mod ray_gen;
pub mod renderer;
pub mod scheduler;
pub mod vertex_cache;

pub use arena::BsdfArena;
pub use bsdf::{Bsdf, BsdfSample, BxdfFlags};
pub use grid::PhotonGrid;
pub use integrator::vcm::{VcmIntegrator, VcmSettings};
pub use integrator::{Integrator, MisHeuristic, PathState, Technique};
pub use queue::RayQueue;
pub use renderer::{RenderSettings, Renderer};
pub use vertex_cache::{LightPathCache, Vertex};

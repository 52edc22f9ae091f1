//! Scene-side data model of the Ember renderer.
//!
//! Everything the rendering core reads but does not own lives here: meshes,
//! materials-as-input, textures, lights, the camera, accumulation images,
//! and the traversal interface (with a BVH collaborator good enough to run
//! the pipeline).

pub mod camera;
pub mod error;
pub mod image;
pub mod light;
pub mod material;
pub mod mesh;
pub mod scene;
pub mod texture;
pub mod trace;

pub use camera::PerspectiveCamera;
pub use error::{RenderError, RenderResult};
pub use image::{AtomicImage, Image};
pub use light::{DirectSample, EmitSample, Light, LightRadiance};
pub use material::{DiffuseInput, MaterialDesc, SurfaceModel};
pub use mesh::TriMesh;
pub use scene::{Intersection, Scene};
pub use texture::{OpacityMask, Texture, TextureError};
pub use trace::{Bvh, Hit, Traversal, TRAVERSAL_BLOCK};

//! Fresnel reflectance terms.

/// Fresnel term of a surface, conductor or dielectric.
#[derive(Debug, Copy, Clone)]
pub enum Fresnel {
    Conductor { eta: f32, kappa: f32 },
    Dielectric { eta_outside: f32, eta_inside: f32 },
}

impl Fresnel {
    /// Reflectance for an incident cosine (sign carries the side for
    /// dielectrics: negative means the ray arrives from the inside).
    pub fn eval(&self, cos_i: f32) -> f32 {
        match *self {
            Fresnel::Conductor { eta, kappa } => fresnel_conductor(cos_i.abs(), eta, kappa),
            Fresnel::Dielectric {
                eta_outside,
                eta_inside,
            } => {
                let (eta_i, eta_t) = if cos_i >= 0.0 {
                    (eta_outside, eta_inside)
                } else {
                    (eta_inside, eta_outside)
                };
                let cos_i = cos_i.abs();
                match refracted_cos(cos_i, eta_i, eta_t) {
                    Some(cos_t) => fresnel_dielectric(cos_i, cos_t, eta_i, eta_t),
                    None => 1.0, // total internal reflection
                }
            }
        }
    }
}

/// Cosine of the refracted direction, or `None` on total internal
/// reflection.
pub fn refracted_cos(cos_i: f32, eta_i: f32, eta_t: f32) -> Option<f32> {
    let ratio = eta_i / eta_t;
    let sin2_t = ratio * ratio * (1.0 - cos_i * cos_i);
    if sin2_t >= 1.0 {
        None
    } else {
        Some((1.0 - sin2_t).sqrt())
    }
}

/// Dielectric reflectance: mean of the parallel and perpendicular
/// polarization terms.
pub fn fresnel_dielectric(cos_i: f32, cos_t: f32, eta_i: f32, eta_t: f32) -> f32 {
    let r_parallel = (eta_t * cos_i - eta_i * cos_t) / (eta_t * cos_i + eta_i * cos_t);
    let r_perpendicular = (eta_i * cos_i - eta_t * cos_t) / (eta_i * cos_i + eta_t * cos_t);
    0.5 * (r_parallel * r_parallel + r_perpendicular * r_perpendicular)
}

/// Conductor reflectance for a complex index of refraction `eta + i kappa`.
pub fn fresnel_conductor(cos_i: f32, eta: f32, kappa: f32) -> f32 {
    let cos2 = cos_i * cos_i;
    let e2k2 = eta * eta + kappa * kappa;
    let r_parallel2 = (e2k2 * cos2 - 2.0 * eta * cos_i + 1.0) / (e2k2 * cos2 + 2.0 * eta * cos_i + 1.0);
    let r_perpendicular2 = (e2k2 - 2.0 * eta * cos_i + cos2) / (e2k2 + 2.0 * eta * cos_i + cos2);
    0.5 * (r_parallel2 + r_perpendicular2)
}

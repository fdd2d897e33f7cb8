//! Spherical geometry on the unit Earth.
//!
//! Distances are epicentral degrees, azimuths are degrees clockwise from
//! north. Everything here is pure math on a sphere; ellipticity is ignored,
//! which matches the resolution of the rest of the pipeline.

/// Distance/azimuth pair between a source and a receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaAzi {
    /// Epicentral distance in degrees.
    pub delta: f64,
    /// Source-to-receiver azimuth in degrees [0, 360).
    pub azimuth: f64,
    /// Receiver-to-source back-azimuth in degrees [0, 360).
    pub back_azimuth: f64,
}

/// Epicentral distance and azimuths between two points given in degrees.
pub fn delazi(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> DeltaAzi {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let cos_delta = phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * dlon.cos();
    let delta = cos_delta.clamp(-1.0, 1.0).acos().to_degrees();

    let azimuth = bearing(phi1, phi2, dlon);
    let back_azimuth = bearing(phi2, phi1, -dlon);

    DeltaAzi {
        delta,
        azimuth,
        back_azimuth,
    }
}

fn bearing(phi_from: f64, phi_to: f64, dlon: f64) -> f64 {
    let y = dlon.sin() * phi_to.cos();
    let x = phi_from.cos() * phi_to.sin() - phi_from.sin() * phi_to.cos() * dlon.cos();
    let az = y.atan2(x).to_degrees();
    (az + 360.0) % 360.0
}

/// Epicentral distance in degrees between two stations.
pub fn station_distance(a: &crate::Station, b: &crate::Station) -> f64 {
    delazi(a.lat, a.lon, b.lat, b.lon).delta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equator_quarter_circle() {
        let da = delazi(0.0, 0.0, 0.0, 90.0);
        assert!((da.delta - 90.0).abs() < 1e-9);
        assert!((da.azimuth - 90.0).abs() < 1e-9);
        assert!((da.back_azimuth - 270.0).abs() < 1e-9);
    }

    #[test]
    fn pole_to_pole() {
        let da = delazi(90.0, 0.0, -90.0, 0.0);
        assert!((da.delta - 180.0).abs() < 1e-9);
    }

    #[test]
    fn northward_azimuth_is_zero() {
        let da = delazi(0.0, 10.0, 30.0, 10.0);
        assert!((da.delta - 30.0).abs() < 1e-9);
        assert!(da.azimuth.abs() < 1e-9 || (da.azimuth - 360.0).abs() < 1e-9);
    }

    #[test]
    fn symmetric_under_swap() {
        let ab = delazi(12.5, 40.0, -33.0, 151.0);
        let ba = delazi(-33.0, 151.0, 12.5, 40.0);
        assert!((ab.delta - ba.delta).abs() < 1e-9);
    }
}

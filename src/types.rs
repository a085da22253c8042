use crate::error::CovarianceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which latent cross-block structure the joint covariance encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Cca,
    Pls,
}

impl ModelKind {
    pub fn other(self) -> Self {
        match self {
            ModelKind::Cca => ModelKind::Pls,
            ModelKind::Pls => ModelKind::Cca,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Cca => write!(f, "cca"),
            ModelKind::Pls => write!(f, "pls"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = CovarianceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cca" => Ok(ModelKind::Cca),
            "pls" => Ok(ModelKind::Pls),
            other => Err(CovarianceError::config(format!(
                "model must be 'cca' or 'pls', got '{other}'"
            ))),
        }
    }
}

/// Size of the dominant (high-variance) subspace hosting latent directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubspaceDimension {
    All,
    #[serde(rename = "force_1")]
    ForceOne,
    Count(usize),
    Fraction(f64),
}

impl Default for SubspaceDimension {
    fn default() -> Self {
        SubspaceDimension::Fraction(0.9)
    }
}

impl FromStr for SubspaceDimension {
    type Err = CovarianceError;

    /// Only the two symbolic tokens are accepted as strings; numeric sizes are
    /// passed as `Count`/`Fraction`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(SubspaceDimension::All),
            "force_1" => Ok(SubspaceDimension::ForceOne),
            other => Err(CovarianceError::config(format!(
                "subspace dimension string must be 'all' or 'force_1', got '{other}'"
            ))),
        }
    }
}

impl SubspaceDimension {
    /// Resolve to a concrete dimension `q` with `1 <= q <= p`.
    pub fn resolve(self, p: usize) -> Result<usize, CovarianceError> {
        match self {
            SubspaceDimension::All => Ok(p),
            SubspaceDimension::ForceOne => Ok(1),
            SubspaceDimension::Count(n) => resolve_count(n, p),
            SubspaceDimension::Fraction(f) => {
                if !f.is_finite() || f <= 0.0 {
                    return Err(CovarianceError::config(format!(
                        "subspace fraction must be finite and positive, got {f}"
                    )));
                }
                if f > 1.0 {
                    if f.fract() != 0.0 {
                        return Err(CovarianceError::config(format!(
                            "subspace dimension above 1 must be a whole number, got {f}"
                        )));
                    }
                    return resolve_count(f as usize, p);
                }
                if p == 1 {
                    return Ok(1);
                }
                let q = (f * p as f64).floor() as usize;
                if q < 1 {
                    return Err(CovarianceError::config(format!(
                        "subspace fraction {f} of {p} dimensions leaves no dimension"
                    )));
                }
                Ok(q.max(2).min(p))
            }
        }
    }
}

fn resolve_count(n: usize, p: usize) -> Result<usize, CovarianceError> {
    if n < 2 || n > p {
        return Err(CovarianceError::config(format!(
            "explicit subspace dimension must lie in [2, {p}] (use force_1 for a single dimension), got {n}"
        )));
    }
    Ok(n)
}

/// Strategy that produced the latent mode directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatentModeAlgorithm {
    Pc1,
    Random,
    Optimization,
    /// Directions re-derived from an existing joint covariance.
    Derived,
}

impl fmt::Display for LatentModeAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LatentModeAlgorithm::Pc1 => "pc1",
            LatentModeAlgorithm::Random => "random",
            LatentModeAlgorithm::Optimization => "optimization",
            LatentModeAlgorithm::Derived => "derived",
        };
        f.write_str(name)
    }
}

impl FromStr for LatentModeAlgorithm {
    type Err = CovarianceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pc1" => Ok(LatentModeAlgorithm::Pc1),
            "random" | "qr" => Ok(LatentModeAlgorithm::Random),
            "optimization" | "opti" => Ok(LatentModeAlgorithm::Optimization),
            other => Err(CovarianceError::config(format!(
                "unknown latent mode search '{other}'"
            ))),
        }
    }
}

/// Non-fatal notes attached to a successful construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisory {
    /// `a_between == 0`: every latent mode gets the same strength.
    EqualModeStrengths,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::EqualModeStrengths => {
                write!(f, "a_between == 0: all between-set associations are equal")
            }
        }
    }
}

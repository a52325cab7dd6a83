//! Deterministic random-number pipeline with variance-reduction overlays.
//!
//! Every stochastic component of the engine draws from a [`ScenarioRng`].
//! The base generator is a 32-bit xorshift kept bit-exact across platforms
//! (explicit wrapping arithmetic, no platform-dependent float paths), which
//! makes recorded tapes replayable and antithetic mirroring exact.
//!
//! Overlays compose rather than inherit:
//! - [`RecordingRng`] forwards to an inner generator while taping every
//!   uniform and normal draw.
//! - [`ReplayRng`] reads a tape back, optionally mirrored (`u -> 1-u`,
//!   `z -> -z`) for antithetic pairs.
//! - [`InjectedNormals`] serves pre-drawn normals (Latin-Hypercube rows)
//!   for the first k draws, then falls through to the inner generator.
//!
//! Sub-streams are derived by label so that, e.g., mortality draws never
//! perturb market-return draws.

use std::f64::consts::TAU;

use rand::RngCore;

/// Replacement for a zero seed; xorshift has a fixed point at zero.
const ZERO_SEED_REPLACEMENT: u32 = 0x9E37_79B9;

/// Stable djb2-style hash of `label|salt`, used for sub-stream derivation.
#[must_use]
pub fn derive_seed(base: u32, label: &str, salt: u32) -> u32 {
    let mut h: u32 = 5381;
    for b in label.bytes() {
        h = h.wrapping_mul(33) ^ u32::from(b);
    }
    h = h.wrapping_mul(33) ^ u32::from(b'|');
    for b in salt.to_le_bytes() {
        h = h.wrapping_mul(33) ^ u32::from(b);
    }
    base ^ h.rotate_left(16)
}

/// The interface every sampling function takes as an explicit parameter.
pub trait ScenarioRng {
    /// Uniform draw in [0, 1).
    fn next_uniform(&mut self) -> f64;

    /// Standard normal draw.
    fn normal(&mut self) -> f64;

    /// Independent sub-stream for a named concern (`"mortality"`,
    /// `"ltc"`, ...). Derived streams are plain base generators; they are
    /// never taped, so record and replay runs see identical sub-streams.
    fn derive(&self, label: &str, salt: u32) -> Xorshift32;

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_uniform()
    }

    /// Student's t draw: normal over sqrt(chi-squared / df), with the
    /// chi-squared built from `df` squared normals so the whole draw flows
    /// through the tape.
    fn student_t(&mut self, df: u32) -> f64 {
        let df = df.max(1);
        let z = self.normal();
        let mut chi_squared = 0.0;
        for _ in 0..df {
            let n = self.normal();
            chi_squared += n * n;
        }
        z / (chi_squared / f64::from(df)).sqrt()
    }
}

/// Base deterministic generator (xorshift32, shifts 13/17/5).
#[derive(Debug, Clone)]
pub struct Xorshift32 {
    seed: u32,
    state: u32,
    antithetic: bool,
    pending_mirror: Option<f64>,
}

impl Xorshift32 {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        let seed = if seed == 0 { ZERO_SEED_REPLACEMENT } else { seed };
        Self {
            seed,
            state: seed,
            antithetic: false,
            pending_mirror: None,
        }
    }

    /// Label-only seeding, for callers that have no base stream.
    #[must_use]
    pub fn from_label(label: &str, salt: u32) -> Self {
        Self::new(derive_seed(0, label, salt))
    }

    /// Live antithetic mode: every other normal is the negation of the one
    /// before it. Used by consumers that do not record a tape.
    #[must_use]
    pub fn with_antithetic(seed: u32) -> Self {
        let mut rng = Self::new(seed);
        rng.antithetic = true;
        rng
    }

    #[must_use]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    fn step(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}

impl ScenarioRng for Xorshift32 {
    fn next_uniform(&mut self) -> f64 {
        f64::from(self.step()) / 4_294_967_296.0
    }

    fn normal(&mut self) -> f64 {
        if self.antithetic
            && let Some(z) = self.pending_mirror.take()
        {
            return z;
        }
        let u = self.next_uniform().max(1e-12);
        let v = self.next_uniform().max(1e-12);
        let z = (-2.0 * u.ln()).sqrt() * (TAU * v).cos();
        if self.antithetic {
            self.pending_mirror = Some(-z);
        }
        z
    }

    fn derive(&self, label: &str, salt: u32) -> Xorshift32 {
        Xorshift32::new(derive_seed(self.seed, label, salt))
    }
}

// Interop with the rand ecosystem (shuffles, rand_distr distributions on
// derived sub-streams). Draws through this interface bypass the tape, so it
// is only used on derived streams, never on the recorded scenario stream.
impl RngCore for Xorshift32 {
    fn next_u32(&mut self) -> u32 {
        self.step()
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.step()) << 32) | u64::from(self.step())
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(4) {
            let bytes = self.step().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// Tape of every uniform and normal produced through a [`RecordingRng`].
#[derive(Debug, Clone, Default)]
pub struct RngTape {
    pub uniforms: Vec<f64>,
    pub normals: Vec<f64>,
}

/// Records draws while forwarding to the inner generator.
#[derive(Debug)]
pub struct RecordingRng<R> {
    inner: R,
    tape: RngTape,
}

impl<R: ScenarioRng> RecordingRng<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            tape: RngTape::default(),
        }
    }

    #[must_use]
    pub fn into_tape(self) -> RngTape {
        self.tape
    }
}

impl<R: ScenarioRng> ScenarioRng for RecordingRng<R> {
    fn next_uniform(&mut self) -> f64 {
        let u = self.inner.next_uniform();
        self.tape.uniforms.push(u);
        u
    }

    fn normal(&mut self) -> f64 {
        let z = self.inner.normal();
        self.tape.normals.push(z);
        z
    }

    fn derive(&self, label: &str, salt: u32) -> Xorshift32 {
        self.inner.derive(label, salt)
    }
}

/// Replays a tape, optionally mirrored for the antithetic twin.
///
/// Twin paths can consume more draws than were recorded (survival timing can
/// shift the year count); past the end of the tape the replay falls through
/// to a fresh derived stream so the scenario still completes.
#[derive(Debug)]
pub struct ReplayRng {
    tape: RngTape,
    uniform_pos: usize,
    normal_pos: usize,
    antithetic: bool,
    base_seed: u32,
    overflow: Xorshift32,
}

impl ReplayRng {
    #[must_use]
    pub fn new(tape: RngTape, antithetic: bool, base_seed: u32) -> Self {
        Self {
            tape,
            uniform_pos: 0,
            normal_pos: 0,
            antithetic,
            base_seed,
            overflow: Xorshift32::new(derive_seed(base_seed, "replay-overflow", 0)),
        }
    }
}

impl ScenarioRng for ReplayRng {
    fn next_uniform(&mut self) -> f64 {
        let u = if self.uniform_pos < self.tape.uniforms.len() {
            let u = self.tape.uniforms[self.uniform_pos];
            self.uniform_pos += 1;
            u
        } else {
            self.overflow.next_uniform()
        };
        if self.antithetic { 1.0 - u } else { u }
    }

    fn normal(&mut self) -> f64 {
        let z = if self.normal_pos < self.tape.normals.len() {
            let z = self.tape.normals[self.normal_pos];
            self.normal_pos += 1;
            z
        } else {
            self.overflow.normal()
        };
        if self.antithetic { -z } else { z }
    }

    fn derive(&self, label: &str, salt: u32) -> Xorshift32 {
        Xorshift32::new(derive_seed(self.base_seed, label, salt))
    }
}

/// Serves pre-supplied normals (Latin-Hypercube row) for the first k normal
/// draws, then falls back to the inner generator. Uniforms pass straight
/// through.
#[derive(Debug)]
pub struct InjectedNormals<R> {
    inner: R,
    values: Vec<f64>,
    pos: usize,
}

impl<R: ScenarioRng> InjectedNormals<R> {
    pub fn new(inner: R, values: Vec<f64>) -> Self {
        Self {
            inner,
            values,
            pos: 0,
        }
    }
}

impl<R: ScenarioRng> ScenarioRng for InjectedNormals<R> {
    fn next_uniform(&mut self) -> f64 {
        self.inner.next_uniform()
    }

    fn normal(&mut self) -> f64 {
        if self.pos < self.values.len() {
            let z = self.values[self.pos];
            self.pos += 1;
            z
        } else {
            self.inner.normal()
        }
    }

    fn derive(&self, label: &str, salt: u32) -> Xorshift32 {
        self.inner.derive(label, salt)
    }
}

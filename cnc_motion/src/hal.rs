//! Switch and encoder interfaces used by the probing cycle, and a simulated
//! implementation driven by the runtime position.

use cnc_common::axis::Axis;
use cnc_common::consts::{AXES, MOTORS};
use tracing::{debug, trace};

/// Debounced state of a switch input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// Switch open.
    Inactive,
    /// Switch closed.
    Active,
    /// Input not configured.
    Disabled,
}

/// Switch inputs.
pub trait SwitchInputs {
    fn read_input(&self, input: u8) -> InputState;

    /// Arm or disarm probing mode on `input`. While armed, the first
    /// activation latches the encoder snapshot.
    fn set_probing_mode(&mut self, input: u8, enabled: bool);
}

/// Motor position feedback.
pub trait Encoders {
    /// Current encoder readings [steps].
    fn read_encoders(&self) -> [f64; MOTORS];

    /// Readings latched at the last probe contact [steps].
    fn encoder_snapshot(&self) -> [f64; MOTORS];
}

// ─── Simulation ─────────────────────────────────────────────────────

/// Flat probe surface normal to one axis. The probe is in contact while
/// the axis position is at or below `surface`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactSurface {
    pub axis: Axis,
    pub surface: f64,
}

/// Simulated probe input and ideal encoders.
///
/// The encoders follow the commanded steps exactly. Feed it the runtime
/// position after every tick with [`SimIo::observe`].
#[derive(Debug, Clone)]
pub struct SimIo {
    probe_input: u8,
    contact: Option<ContactSurface>,
    position: [f64; AXES],
    steps: [f64; MOTORS],
    probing_mode: bool,
    latched: bool,
    snapshot: [f64; MOTORS],
}

impl SimIo {
    /// Probe on `probe_input` with no surface: it never triggers.
    pub fn new(probe_input: u8) -> Self {
        Self {
            probe_input,
            contact: None,
            position: [0.0; AXES],
            steps: [0.0; MOTORS],
            probing_mode: false,
            latched: false,
            snapshot: [0.0; MOTORS],
        }
    }

    pub fn with_contact(probe_input: u8, axis: Axis, surface: f64) -> Self {
        let mut io = Self::new(probe_input);
        io.set_contact(Some(ContactSurface { axis, surface }));
        io
    }

    pub fn set_contact(&mut self, contact: Option<ContactSurface>) {
        self.contact = contact;
    }

    #[inline]
    pub fn probing_mode(&self) -> bool {
        self.probing_mode
    }

    /// Whether a snapshot was latched since probing mode was armed.
    #[inline]
    pub fn latched(&self) -> bool {
        self.latched
    }

    fn in_contact(&self) -> bool {
        self.contact
            .is_some_and(|c| self.position[c.axis.index()] <= c.surface)
    }

    /// Update the simulated machine position and motor steps.
    pub fn observe(&mut self, position: &[f64; AXES], steps: &[f64; MOTORS]) {
        self.position = *position;
        self.steps = *steps;
        if self.probing_mode && !self.latched && self.in_contact() {
            self.snapshot = self.steps;
            self.latched = true;
            trace!(?position, "probe contact latched");
        }
    }
}

impl SwitchInputs for SimIo {
    fn read_input(&self, input: u8) -> InputState {
        if input != self.probe_input {
            return InputState::Disabled;
        }
        if self.in_contact() {
            InputState::Active
        } else {
            InputState::Inactive
        }
    }

    fn set_probing_mode(&mut self, input: u8, enabled: bool) {
        if input != self.probe_input {
            return;
        }
        self.probing_mode = enabled;
        if enabled {
            self.latched = false;
            if self.in_contact() {
                self.snapshot = self.steps;
                self.latched = true;
            }
        }
        debug!(input, enabled, "probing mode");
    }
}

impl Encoders for SimIo {
    fn read_encoders(&self) -> [f64; MOTORS] {
        self.steps
    }

    fn encoder_snapshot(&self) -> [f64; MOTORS] {
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_z(z: f64) -> ([f64; AXES], [f64; MOTORS]) {
        let mut position = [0.0; AXES];
        position[2] = z;
        let mut steps = [0.0; MOTORS];
        steps[2] = z * 1280.0;
        (position, steps)
    }

    #[test]
    fn no_surface_never_triggers() {
        let mut io = SimIo::new(5);
        io.set_probing_mode(5, true);
        let (p, s) = at_z(-100.0);
        io.observe(&p, &s);
        assert_eq!(io.read_input(5), InputState::Inactive);
        assert!(!io.latched());
    }

    #[test]
    fn other_inputs_are_disabled() {
        let io = SimIo::with_contact(5, Axis::Z, 0.0);
        assert_eq!(io.read_input(1), InputState::Disabled);
    }

    #[test]
    fn latches_first_contact_only_while_armed() {
        let mut io = SimIo::with_contact(5, Axis::Z, -1.0);
        let (p, s) = at_z(-1.5);
        io.observe(&p, &s);
        assert!(!io.latched(), "not armed");

        let (p, s) = at_z(0.0);
        io.observe(&p, &s);
        io.set_probing_mode(5, true);
        for z in [-0.5, -1.0, -1.2, -2.0] {
            let (p, s) = at_z(z);
            io.observe(&p, &s);
        }
        assert!(io.latched());
        assert_eq!(io.encoder_snapshot()[2], -1280.0);
        assert_eq!(io.read_encoders()[2], -2560.0);
        assert_eq!(io.read_input(5), InputState::Active);
    }

    #[test]
    fn arming_in_contact_latches_immediately() {
        let mut io = SimIo::with_contact(5, Axis::Z, 1.0);
        let (p, s) = at_z(0.5);
        io.observe(&p, &s);
        io.set_probing_mode(5, true);
        assert!(io.latched());
        assert_eq!(io.encoder_snapshot()[2], 640.0);
    }
}

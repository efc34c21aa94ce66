// ── Program-selector locations ──
//
// Appliance families keep the active program in different places. Each
// known place is a `ProgramLocation`; a `LocatorChain` is the ordered list
// probed for one family, first hit wins. Adding a family means adding a
// chain here, never special-casing the resolver.

use serde_json::{Map, Value};

use crate::model::PropertyPath;

/// One known place where the active program may live, both in reported
/// state and in the capability schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLocation {
    selector: &'static str,
}

impl ProgramLocation {
    pub const fn new(selector: &'static str) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &'static str {
        self.selector
    }

    pub fn selector_path(&self) -> PropertyPath {
        PropertyPath::from(self.selector)
    }

    /// The active program named at this location in reported state.
    pub fn active_program<'a>(&self, reported: &'a Map<String, Value>) -> Option<&'a str> {
        self.selector_path()
            .lookup(reported)?
            .as_str()
            .filter(|p| !p.is_empty())
    }

    /// The per-property overrides this location's schema entry holds for
    /// `program`: `capabilities[selector]["values"][program]`.
    pub fn program_overrides<'a>(
        &self,
        capabilities: &'a Map<String, Value>,
        program: &str,
    ) -> Option<&'a Map<String, Value>> {
        self.selector_path()
            .lookup(capabilities)?
            .get("values")?
            .get(program)?
            .as_object()
            .filter(|o| !o.is_empty())
    }
}

/// Flat `program` field (ovens and most cooking appliances).
pub const FLAT_PROGRAM: ProgramLocation = ProgramLocation::new("program");
/// `userSelections/programUID` (laundry).
pub const USER_SELECTIONS: ProgramLocation = ProgramLocation::new("userSelections/programUID");
/// `cyclePersonalization/programUID` (newer laundry firmware).
pub const CYCLE_PERSONALIZATION: ProgramLocation =
    ProgramLocation::new("cyclePersonalization/programUID");

const DEFAULT_CHAIN: &[ProgramLocation] = &[FLAT_PROGRAM, USER_SELECTIONS, CYCLE_PERSONALIZATION];
const LAUNDRY_CHAIN: &[ProgramLocation] = &[USER_SELECTIONS, CYCLE_PERSONALIZATION, FLAT_PROGRAM];

/// Family codes whose program lives under `userSelections`.
const LAUNDRY_FAMILIES: &[&str] = &["WM", "TD", "WD", "WASHER", "DRYER", "WASHER_DRYER"];

/// Ordered program-selector probe list for one appliance family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorChain {
    locations: &'static [ProgramLocation],
}

impl LocatorChain {
    pub fn for_family(family: Option<&str>) -> Self {
        let laundry = family.is_some_and(|f| {
            LAUNDRY_FAMILIES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(f))
        });
        Self {
            locations: if laundry { LAUNDRY_CHAIN } else { DEFAULT_CHAIN },
        }
    }

    pub fn locations(&self) -> &'static [ProgramLocation] {
        self.locations
    }

    /// `true` if `path` is any known program selector.
    pub fn is_selector(&self, path: &PropertyPath) -> bool {
        DEFAULT_CHAIN.iter().any(|l| l.selector() == path.as_str())
    }

    /// First location that names an active program.
    pub fn active_program<'a>(
        &self,
        reported: &'a Map<String, Value>,
    ) -> Option<(ProgramLocation, &'a str)> {
        self.locations
            .iter()
            .find_map(|l| l.active_program(reported).map(|p| (*l, p)))
    }

    /// First location whose schema holds a non-empty override set for
    /// `program`.
    pub fn program_overrides<'a>(
        &self,
        capabilities: &'a Map<String, Value>,
        program: &str,
    ) -> Option<(ProgramLocation, &'a Map<String, Value>)> {
        self.locations
            .iter()
            .find_map(|l| l.program_overrides(capabilities, program).map(|o| (*l, o)))
    }
}

//! Placement of hot-plugged devices on the hypervisor's PCI topology.
//!
//! With no buses configured the hypervisor assigns slots itself. With an
//! explicit bus list, physical function N lands on bus N/32 at address
//! N%32, 32 device slots per bus.

use crate::error::OpError;

/// Device slots available on one hypervisor PCI bus.
const SLOTS_PER_BUS: i32 = 32;

/// Resolved placement of a device. Unset fields defer to the hypervisor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceLocation {
    pub bus: Option<String>,
    pub addr: Option<String>,
}

#[derive(Clone, Debug)]
enum Placement {
    /// No buses configured, the hypervisor picks the slot.
    Auto,
    /// Explicit bus list, slots are computed from the physical function.
    Buses(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct DeviceLocator {
    placement: Placement,
}

impl DeviceLocator {
    /// Build a locator from the configured bus list. Bus names must be
    /// non-empty and unique; an empty list selects hypervisor-assigned
    /// placement.
    pub fn new(buses: Vec<String>) -> Result<Self, OpError> {
        if buses.is_empty() {
            return Ok(Self {
                placement: Placement::Auto,
            });
        }
        for (i, bus) in buses.iter().enumerate() {
            if bus.is_empty() {
                return Err(OpError::invalid("bus name cannot be empty"));
            }
            if buses[.. i].contains(bus) {
                return Err(OpError::invalid(format!("duplicated bus name '{}'", bus)));
            }
        }
        Ok(Self {
            placement: Placement::Buses(buses),
        })
    }

    /// Map a physical function to its bus and address.
    pub fn calculate(&self, physical_function: i32) -> Result<DeviceLocation, OpError> {
        let buses = match &self.placement {
            Placement::Auto => return Ok(DeviceLocation::default()),
            Placement::Buses(buses) => buses,
        };
        if physical_function < 0 {
            return Err(OpError::invalid(format!(
                "physical function {} cannot be negative",
                physical_function
            )));
        }
        let index = (physical_function / SLOTS_PER_BUS) as usize;
        if index >= buses.len() {
            return Err(OpError::invalid(format!(
                "no corresponding bus for physical function {}",
                physical_function
            )));
        }
        Ok(DeviceLocation {
            bus: Some(buses[index].clone()),
            addr: Some(format!("{:#x}", physical_function % SLOTS_PER_BUS)),
        })
    }
}

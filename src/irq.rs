//! Interrupt routing (spec §4.9/§6): a fixed-size table by IRQ number,
//! since this root server only ever fields interrupts from the drivers
//! it itself owns (console, disk, network) and the at-most-one-handler
//! invariant is cheaper to enforce with a flat array than a map.

use crate::error::{SosError, SosResult};

const MAX_IRQ: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    Console,
    Disk,
    Net,
    Timer,
}

pub struct IrqRouter {
    handlers: [Option<IrqSource>; MAX_IRQ],
}

impl IrqRouter {
    pub fn new() -> Self {
        IrqRouter {
            handlers: [None; MAX_IRQ],
        }
    }

    /// Registers `source` for `irq`. At most one handler per line (spec
    /// §4.9 invariant); registering over an existing handler is an error.
    pub fn register(&mut self, kernel: &mut dyn crate::kernel_if::KernelOps, irq: u32, source: IrqSource) -> SosResult<()> {
        let slot = self.handlers.get_mut(irq as usize).ok_or(SosError::PathInv)?;
        if slot.is_some() {
            return Err(SosError::Exist);
        }
        *slot = Some(source);
        kernel.irq_unmask(irq);
        Ok(())
    }

    pub fn revoke(&mut self, kernel: &mut dyn crate::kernel_if::KernelOps, irq: u32) {
        if let Some(slot) = self.handlers.get_mut(irq as usize) {
            if slot.take().is_some() {
                kernel.irq_mask(irq);
            }
        }
    }

    pub fn source_for(&self, irq: u32) -> Option<IrqSource> {
        self.handlers.get(irq as usize).copied().flatten()
    }
}

impl Default for IrqRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimKernel;

    #[test]
    fn double_registration_on_same_irq_is_rejected() {
        let mut router = IrqRouter::new();
        let mut kernel = SimKernel::new();
        router.register(&mut kernel, 3, IrqSource::Console).unwrap();
        assert_eq!(router.register(&mut kernel, 3, IrqSource::Disk), Err(SosError::Exist));
    }

    #[test]
    fn revoke_frees_the_line_for_reuse() {
        let mut router = IrqRouter::new();
        let mut kernel = SimKernel::new();
        router.register(&mut kernel, 5, IrqSource::Net).unwrap();
        router.revoke(&mut kernel, 5);
        assert!(router.register(&mut kernel, 5, IrqSource::Timer).is_ok());
    }
}

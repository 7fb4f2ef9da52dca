//! Data-forwarding network: route not-yet-committed results from the
//! execute, memory, and writeback latches back into decode's register
//! read.

use crate::isa::RegRef;

use super::Latches;

/// One in-flight result that may satisfy a decode-stage read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Producer {
    pub dst: RegRef,
    pub val: u64,
    pub w_enable: bool,
}

/// Assemble the producers in freshness order: execute latch first, then
/// memory, then writeback.
///
/// `x_val_ex` and `m_val_mem` are this cycle's ALU result and memory-load
/// value. A load sitting in execute has no result to forward yet; the
/// hazard unit stalls its consumers, so it is excluded here.
pub fn producers(lat: &Latches, x_val_ex: u64, m_val_mem: u64) -> [Producer; 3] {
    [
        Producer {
            dst: lat.x.dst,
            val: x_val_ex,
            w_enable: lat.x.w_sigs.w_enable && !lat.x.m_sigs.dmem_read,
        },
        Producer {
            dst: lat.m.dst,
            val: if lat.m.w_sigs.wval_sel {
                m_val_mem
            } else {
                lat.m.val_ex
            },
            w_enable: lat.m.w_sigs.w_enable,
        },
        Producer {
            dst: lat.w.dst,
            val: if lat.w.w_sigs.wval_sel {
                lat.w.val_mem
            } else {
                lat.w.val_ex
            },
            w_enable: lat.w.w_sigs.w_enable,
        },
    ]
}

/// Pick the freshest producer matching `src`, falling back to the
/// register-file read. Never fires for the zero register.
pub fn select(src: RegRef, rf_val: u64, producers: &[Producer; 3]) -> u64 {
    if src == RegRef::Xzr {
        return rf_val;
    }
    for p in producers {
        if p.w_enable && p.dst != RegRef::Xzr && p.dst == src {
            return p.val;
        }
    }
    rf_val
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prod(dst: RegRef, val: u64, w_enable: bool) -> Producer {
        Producer { dst, val, w_enable }
    }

    #[test]
    fn freshest_producer_wins() {
        let ps = [
            prod(RegRef::Gpr(1), 10, true),
            prod(RegRef::Gpr(1), 20, true),
            prod(RegRef::Gpr(1), 30, true),
        ];
        assert_eq!(select(RegRef::Gpr(1), 99, &ps), 10);
    }

    #[test]
    fn older_producers_fill_in() {
        let ps = [
            prod(RegRef::Gpr(2), 10, true),
            prod(RegRef::Gpr(1), 20, true),
            prod(RegRef::Gpr(1), 30, true),
        ];
        assert_eq!(select(RegRef::Gpr(1), 99, &ps), 20);
        let ps = [
            prod(RegRef::Gpr(2), 10, true),
            prod(RegRef::Gpr(3), 20, true),
            prod(RegRef::Gpr(1), 30, true),
        ];
        assert_eq!(select(RegRef::Gpr(1), 99, &ps), 30);
    }

    #[test]
    fn disabled_or_mismatched_producers_fall_through() {
        let ps = [
            prod(RegRef::Gpr(1), 10, false),
            prod(RegRef::Gpr(4), 20, true),
            prod(RegRef::Gpr(5), 30, true),
        ];
        assert_eq!(select(RegRef::Gpr(1), 99, &ps), 99);
    }

    #[test]
    fn zero_register_never_forwards() {
        let ps = [
            prod(RegRef::Xzr, 10, true),
            prod(RegRef::Xzr, 20, true),
            prod(RegRef::Xzr, 30, true),
        ];
        assert_eq!(select(RegRef::Xzr, 0, &ps), 0);
    }

    #[test]
    fn stack_pointer_forwards_like_any_register() {
        let ps = [
            prod(RegRef::Sp, 0x7000, true),
            prod(RegRef::Gpr(1), 20, true),
            prod(RegRef::Gpr(2), 30, true),
        ];
        assert_eq!(select(RegRef::Sp, 0x6000, &ps), 0x7000);
    }
}

use smoltcp::wire::{EthernetAddress, EthernetFrame};

/// Transform selector, resolved into a [`Transform`] once the egress MAC is
/// known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransformMode {
    #[default]
    Transparent,
    RewriteSource,
    SwapAddresses,
}

/// Per-packet link-layer rewrite applied between receive and transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Forward frames untouched, whatever their destination.
    Transparent,
    /// Replace the source MAC with the given (egress port) address.
    RewriteSource(EthernetAddress),
    /// Exchange source and destination MACs.
    SwapAddresses,
}

impl Transform {
    pub fn new(mode: TransformMode, egress_mac: EthernetAddress) -> Self {
        match mode {
            TransformMode::Transparent => Transform::Transparent,
            TransformMode::RewriteSource => Transform::RewriteSource(egress_mac),
            TransformMode::SwapAddresses => Transform::SwapAddresses,
        }
    }

    pub fn mode(&self) -> TransformMode {
        match self {
            Transform::Transparent => TransformMode::Transparent,
            Transform::RewriteSource(_) => TransformMode::RewriteSource,
            Transform::SwapAddresses => TransformMode::SwapAddresses,
        }
    }

    /// Rewrite `frame` in place. A frame too short to carry an Ethernet
    /// header is left untouched.
    #[inline]
    pub fn apply(&self, frame: &mut [u8]) {
        let Ok(mut eth) = EthernetFrame::new_checked(frame) else {
            return;
        };
        match *self {
            Transform::Transparent => {}
            Transform::RewriteSource(mac) => eth.set_src_addr(mac),
            Transform::SwapAddresses => {
                let src = eth.src_addr();
                let dst = eth.dst_addr();
                eth.set_src_addr(dst);
                eth.set_dst_addr(src);
            }
        }
    }
}

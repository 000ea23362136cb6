use crate::dht::Dht;

/// Handle to the onion announce subsystem, constructed from the DHT
/// core like the other subsystems. The announce protocol itself lives
/// behind the core; this handle switches on packet accounting so the
/// daemon can observe announce traffic.
pub struct Announce {
    _priv: (),
}

impl Announce {
    pub fn new(dht: &mut Dht) -> Self {
        dht.enable_announce();
        Self { _priv: () }
    }
}

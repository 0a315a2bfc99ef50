use crate::candidate::Candidate;
use crate::port::Port;

/// Signals a [`PortAllocatorSession`] raises while gathering.
pub enum SessionEvent {
    PortReady(Box<dyn Port>),
    CandidatesReady(Vec<Candidate>),
    CandidatesAllocationDone,
}

/// Produces the ports and local candidates of one gathering generation.
pub trait PortAllocatorSession {
    fn generation(&self) -> u32;
    fn set_generation(&mut self, generation: u32);

    /// Offers the ports that are ready right away.
    fn get_initial_ports(&mut self);
    fn start_get_all_ports(&mut self);
    fn stop_get_all_ports(&mut self);
    fn is_getting_all_ports(&self) -> bool;

    fn poll_event(&mut self) -> Option<SessionEvent>;
}

/// Creates gathering sessions for a transport channel.
pub trait PortAllocator {
    fn create_session(
        &mut self,
        transport_id: &str,
        component: u16,
        ice_ufrag: &str,
        ice_pwd: &str,
    ) -> Box<dyn PortAllocatorSession>;
}

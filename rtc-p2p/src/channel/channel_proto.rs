use super::*;

impl sansio::Protocol<TaggedBytesMut, BytesMut, TransportInput> for P2pTransportChannel {
    type Rout = TaggedBytesMut;
    type Wout = TaggedBytesMut;
    type Eout = ChannelEvent;
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, msg: TaggedBytesMut) -> std::result::Result<(), Self::Error> {
        if self.closed {
            return Err(Error::ErrClosed);
        }
        self.last_now = self.last_now.max(msg.now);

        let local_addr = msg.transport.local_addr;
        let peer_addr = msg.transport.peer_addr;
        let result = if let Some(handle) = self.arena.find_by_addrs(local_addr, peer_addr) {
            match self.arena.get_mut(handle) {
                Some(entry) => entry.conn.handle_read(msg),
                None => Err(Error::ErrConnectionNotFound),
            }
        } else if let Some(port) = self
            .all_ports_mut()
            .find(|port| port.local_addr() == local_addr)
        {
            port.handle_read(msg)
        } else {
            warn!(
                "[{}]: discarded packet from {peer_addr}, no port on {local_addr}",
                self.get_name()
            );
            Err(Error::ErrUnhandledPacket)
        };

        self.process_events();
        result
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        self.read_outs.pop_front()
    }

    fn handle_write(&mut self, msg: BytesMut) -> std::result::Result<(), Self::Error> {
        if self.closed {
            return Err(Error::ErrClosed);
        }
        let result = self.send_packet(&msg).map(|_| ());
        self.process_events();
        result
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.poll_transmit()
    }

    fn handle_event(&mut self, evt: TransportInput) -> std::result::Result<(), Self::Error> {
        if self.closed {
            return Err(Error::ErrClosed);
        }

        match evt {
            TransportInput::Connect => self.connect()?,
            TransportInput::Reset => self.reset()?,
            TransportInput::SetRole(role) => self.set_role(role),
            TransportInput::SetTiebreaker(tiebreaker) => self.set_tiebreaker(tiebreaker),
            TransportInput::SetIceProtocolType(protocol) => self.set_ice_protocol_type(protocol),
            TransportInput::SetIceCredentials { ufrag, pwd } => {
                self.set_ice_credentials(ufrag, pwd)
            }
            TransportInput::AddRemoteCandidate(candidate) => {
                self.add_remote_candidate(candidate)?
            }
            TransportInput::SetOption(option, value) => self.set_option(option, value),
        }

        self.process_events();
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.event_outs.pop_front()
    }

    fn handle_timeout(&mut self, now: Self::Time) -> std::result::Result<(), Self::Error> {
        if self.closed {
            return Ok(());
        }
        self.last_now = self.last_now.max(now);

        if self.sort_dirty {
            self.sort_connections();
        }
        if self.next_ping.is_some_and(|next_ping| next_ping <= now) {
            self.on_ping(now);
        }

        self.process_events();
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        if self.closed {
            None
        } else if self.sort_dirty {
            Some(self.last_now)
        } else {
            self.next_ping
        }
    }

    fn close(&mut self) -> std::result::Result<(), Self::Error> {
        if !self.closed {
            self.shutdown();
        }
        Ok(())
    }
}

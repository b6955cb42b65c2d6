use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::delta::DeltaEncoder;

use super::channel::Channel;
use super::speed::SendRate;
use super::stats::rand_u64;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
}

/// Server-side view of one client.
#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub client_id: u32,
    pub player_id: i32,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub session_token: u64,
    pub resumed: bool,
    pub ready: bool,
    pub channel: Channel,
    pub encoder: DeltaEncoder,
    pub send_rate: SendRate,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, client_id: u32, client_salt: u64) -> Self {
        Self {
            addr,
            client_id,
            player_id: client_id as i32,
            state: ConnectionState::Connecting,
            client_salt,
            server_salt: rand_u64(),
            session_token: rand_u64(),
            resumed: false,
            ready: false,
            channel: Channel::new(),
            encoder: DeltaEncoder::new(),
            send_rate: SendRate::default(),
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.channel.is_timed_out(timeout)
    }

    pub fn touch(&mut self) {
        self.channel.touch();
    }
}

/// Identity of a client that dropped and may come back with its token.
#[derive(Debug, Clone, Copy)]
struct Suspended {
    client_id: u32,
    player_id: i32,
}

#[derive(Debug)]
pub struct ConnectionManager {
    clients_by_addr: HashMap<SocketAddr, u32>,
    clients: HashMap<u32, ClientConnection>,
    suspended: HashMap<u64, Suspended>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: HashMap::new(),
            suspended: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Returns the pending connection for `addr`, creating it on first
    /// contact. A known `session_token` brings back the suspended identity.
    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
        session_token: Option<u64>,
    ) -> Result<&mut ClientConnection, &'static str> {
        if let Some(&client_id) = self.clients_by_addr.get(&addr) {
            return self.clients.get_mut(&client_id).ok_or("Unknown client");
        }

        if self.clients.len() >= self.max_clients {
            return Err("Server full");
        }

        let suspended = session_token.and_then(|token| {
            self.suspended
                .remove(&token)
                .map(|suspended| (token, suspended))
        });

        let connection = match suspended {
            Some((token, suspended)) => {
                let mut connection = ClientConnection::new(addr, suspended.client_id, client_salt);
                connection.player_id = suspended.player_id;
                connection.session_token = token;
                connection.resumed = true;
                connection
            }
            None => {
                let client_id = self.next_client_id;
                self.next_client_id += 1;
                ClientConnection::new(addr, client_id, client_salt)
            }
        };

        let client_id = connection.client_id;
        self.clients_by_addr.insert(addr, client_id);
        Ok(self.clients.entry(client_id).or_insert(connection))
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientConnection> {
        self.clients_by_addr
            .get(addr)
            .and_then(|id| self.clients.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientConnection> {
        let id = self.clients_by_addr.get(addr)?;
        self.clients.get_mut(id)
    }

    pub fn get(&self, client_id: u32) -> Option<&ClientConnection> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut ClientConnection> {
        self.clients.get_mut(&client_id)
    }

    pub fn remove(&mut self, client_id: u32) -> Option<ClientConnection> {
        let conn = self.clients.remove(&client_id)?;
        self.clients_by_addr.remove(&conn.addr);
        Some(conn)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<ClientConnection> {
        let client_id = self.clients_by_addr.remove(addr)?;
        self.clients.remove(&client_id)
    }

    /// Removes a client but keeps its identity for a later resume.
    pub fn suspend(&mut self, client_id: u32) -> Option<ClientConnection> {
        let conn = self.remove(client_id)?;
        if conn.is_connected() {
            self.suspended.insert(
                conn.session_token,
                Suspended {
                    client_id: conn.client_id,
                    player_id: conn.player_id,
                },
            );
        }
        Some(conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientConnection> {
        self.clients.values_mut()
    }

    /// Suspends clients that stopped talking and returns their ids.
    pub fn cleanup_timed_out(&mut self) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        for id in &timed_out {
            self.suspend(*id);
        }

        timed_out
    }

    pub fn connected_count(&self) -> usize {
        self.clients.values().filter(|c| c.is_connected()).count()
    }

    pub fn total_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_server_full() {
        let mut manager = ConnectionManager::new(1);
        assert!(manager.get_or_create_pending(addr(1000), 1, None).is_ok());
        assert!(manager.get_or_create_pending(addr(1000), 1, None).is_ok());
        assert_eq!(
            manager.get_or_create_pending(addr(1001), 2, None).err(),
            Some("Server full")
        );
    }

    #[test]
    fn test_resume_restores_identity() {
        let mut manager = ConnectionManager::new(4);
        let (client_id, token) = {
            let conn = manager.get_or_create_pending(addr(2000), 1, None).unwrap();
            conn.state = ConnectionState::Connected;
            (conn.client_id, conn.session_token)
        };
        manager.suspend(client_id);
        assert_eq!(manager.total_count(), 0);

        let conn = manager
            .get_or_create_pending(addr(2001), 7, Some(token))
            .unwrap();
        assert!(conn.resumed);
        assert_eq!(conn.client_id, client_id);

        let fresh = manager.get_or_create_pending(addr(2002), 8, Some(token)).unwrap();
        assert!(!fresh.resumed);
        assert_ne!(fresh.client_id, client_id);
    }
}

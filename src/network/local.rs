use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::party::error::{MpcError, MpcResult};

use super::Player;

/// A [Player] connected to the other parties of the same process through in-memory channels.
pub struct LocalPlayer {
    my_num: usize,
    senders: Vec<Option<Sender<Vec<u8>>>>,
    receivers: Vec<Option<Receiver<Vec<u8>>>>,
    bytes_sent: u64,
}

/// Builds fully connected sets of [LocalPlayer]s.
pub struct LocalNetwork;

impl LocalNetwork {
    /// Returns `n` players where player `i` has index `i`.
    pub fn mesh(n: usize) -> Vec<LocalPlayer> {
        let mut players: Vec<LocalPlayer> = (0..n)
            .map(|i| LocalPlayer {
                my_num: i,
                senders: (0..n).map(|_| None).collect(),
                receivers: (0..n).map(|_| None).collect(),
                bytes_sent: 0,
            })
            .collect();
        for from in 0..n {
            for to in (0..n).filter(|to| *to != from) {
                let (sender, receiver) = channel();
                players[from].senders[to] = Some(sender);
                players[to].receivers[from] = Some(receiver);
            }
        }
        players
    }
}

impl Player for LocalPlayer {
    fn my_num(&self) -> usize {
        self.my_num
    }

    fn num_players(&self) -> usize {
        self.senders.len()
    }

    fn send_to(&mut self, to: usize, data: &[u8]) -> MpcResult<()> {
        let sender = self
            .senders
            .get(to)
            .and_then(Option::as_ref)
            .ok_or(MpcError::InvalidParameters(format!("no connection to party {}", to)))?;
        sender.send(data.to_vec()).map_err(|_| {
            MpcError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("party {} is gone", to),
            ))
        })?;
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn receive_from(&mut self, from: usize) -> MpcResult<Vec<u8>> {
        let receiver = self
            .receivers
            .get(from)
            .and_then(Option::as_ref)
            .ok_or(MpcError::InvalidParameters(format!("no connection to party {}", from)))?;
        Ok(receiver.recv()?)
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn teardown(&mut self) -> MpcResult<()> {
        self.senders.iter_mut().for_each(|s| *s = None);
        Ok(())
    }
}

//! Game lifecycle detection from confirmed game records

use head_codec::{GameRecord, GameState};
use head_types::TxId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    NewGame {
        game_id: TxId,
        player_count: u64,
        bot_count: u64,
        first_ephemeral_key: Option<Vec<u8>>,
    },
    PlayerJoin {
        game_id: TxId,
        ephemeral_keys: Vec<Vec<u8>>,
    },
    StateChanged {
        game_id: TxId,
        state: GameState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedGame {
    /// Transaction that created the game record
    pub game_id: TxId,
    pub players: Vec<Vec<u8>>,
    pub state: GameState,
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    current: Option<TrackedGame>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&TrackedGame> {
        self.current.as_ref()
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.current, Some(g) if g.state == GameState::Running)
    }

    /// Compare a confirmed record against the tracked game
    pub fn observe(&mut self, tx_id: TxId, record: &GameRecord) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        match &mut self.current {
            Some(game) if !record.players.is_empty() => {
                if game.players != record.players {
                    game.players = record.players.clone();
                    events.push(LifecycleEvent::PlayerJoin {
                        game_id: game.game_id,
                        ephemeral_keys: record.players.clone(),
                    });
                }
                if game.state != record.state {
                    game.state = record.state;
                    events.push(LifecycleEvent::StateChanged {
                        game_id: game.game_id,
                        state: record.state,
                    });
                }
            }
            _ => {
                events.push(LifecycleEvent::NewGame {
                    game_id: tx_id,
                    player_count: record.player_count,
                    bot_count: record.bot_count,
                    first_ephemeral_key: record.players.first().cloned(),
                });
                if record.state != GameState::Lobby {
                    events.push(LifecycleEvent::StateChanged {
                        game_id: tx_id,
                        state: record.state,
                    });
                }
                self.current = Some(TrackedGame {
                    game_id: tx_id,
                    players: record.players.clone(),
                    state: record.state,
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(players: Vec<Vec<u8>>, state: GameState) -> GameRecord {
        GameRecord {
            referee_key_hash: vec![0xaa; 28],
            player_count: 2,
            bot_count: 1,
            players,
            state,
            winner: None,
            cheater: None,
        }
    }

    #[test]
    fn test_new_game_join_and_start() {
        let mut t = LifecycleTracker::new();
        let game = TxId([1; 32]);
        assert_eq!(
            t.observe(game, &record(vec![], GameState::Lobby)),
            vec![LifecycleEvent::NewGame {
                game_id: game,
                player_count: 2,
                bot_count: 1,
                first_ephemeral_key: None,
            }]
        );

        let joined = record(vec![vec![1; 28]], GameState::Lobby);
        assert_eq!(
            t.observe(TxId([2; 32]), &joined),
            vec![LifecycleEvent::PlayerJoin {
                game_id: game,
                ephemeral_keys: vec![vec![1; 28]],
            }]
        );
        assert!(t.observe(TxId([3; 32]), &joined).is_empty());

        let started = record(vec![vec![1; 28], vec![2; 28]], GameState::Running);
        let events = t.observe(TxId([4; 32]), &started);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            LifecycleEvent::StateChanged {
                game_id: game,
                state: GameState::Running
            }
        );
        assert!(t.is_running());
    }

    #[test]
    fn test_first_record_with_players_is_new_game() {
        let mut t = LifecycleTracker::new();
        let events = t.observe(TxId([5; 32]), &record(vec![vec![9; 28]], GameState::Running));
        assert!(matches!(
            &events[0],
            LifecycleEvent::NewGame { first_ephemeral_key: Some(k), .. } if k == &vec![9; 28]
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(t.current().unwrap().game_id, TxId([5; 32]));
    }
}

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::index::{ConnectedOptions, Direction, SearchEngine, SearchOptions};

const SESSION_CAPACITY: usize = 20;
const SEED_OVERSCAN: usize = 4;
const NEIGHBORHOOD_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct AssociateOptions {
    pub limit: usize,
    /// Blend weight of the session-affinity term.
    pub strength: f64,
}

impl Default for AssociateOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            strength: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssociatedHit {
    pub uid: String,
    pub title: String,
    pub snippet: String,
    pub hybrid_score: f64,
    pub affinity: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReflection {
    pub session_id: String,
    pub recent: Vec<ReflectedNote>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectedNote {
    pub uid: String,
    pub title: Option<String>,
}

/// Bounded, ordered recency list per session. In-memory only: sessions
/// die with the process or on explicit reset.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, VecDeque<String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Vec<String>> {
        let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions
            .get(session_id)
            .map(|recent| recent.iter().cloned().collect())
    }

    /// Creates the session when absent and returns its recency list.
    pub fn ensure(&self, session_id: &str) -> Vec<String> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_default()
            .iter()
            .cloned()
            .collect()
    }

    pub fn reset(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.remove(session_id);
    }

    /// Re-referencing a UID moves it to the back; the list is bounded.
    pub fn record(&self, session_id: &str, uid: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let recent = sessions.entry(session_id.to_string()).or_default();
        recent.retain(|u| u != uid);
        recent.push_back(uid.to_string());
        while recent.len() > SESSION_CAPACITY {
            recent.pop_front();
        }
    }

    /// Hybrid search reweighted by how much of the session's recent set
    /// sits in each candidate's depth-1 neighborhood. A missing session
    /// is created empty.
    pub fn associate(
        &self,
        engine: &SearchEngine,
        session_id: &str,
        query: &str,
        opts: &AssociateOptions,
    ) -> Result<Vec<AssociatedHit>> {
        let recent = self.ensure(session_id);
        let strength = opts.strength.clamp(0.0, 1.0);

        let seed_opts = SearchOptions {
            limit: (opts.limit * SEED_OVERSCAN).max(opts.limit),
            ..Default::default()
        };
        let seeds = engine.search(query, &seed_opts)?;

        let mut out = Vec::with_capacity(seeds.results.len());
        for seed in seeds.results {
            let affinity = if recent.is_empty() {
                0.0
            } else {
                let neighborhood: HashSet<String> = engine
                    .connected(
                        &seed.uid,
                        &ConnectedOptions {
                            depth: 1,
                            limit: NEIGHBORHOOD_LIMIT,
                            direction: Direction::Both,
                        },
                    )?
                    .into_iter()
                    .map(|n| n.uid)
                    .collect();
                let overlap = recent.iter().filter(|uid| neighborhood.contains(*uid)).count();
                overlap as f64 / recent.len() as f64
            };

            let final_score = (1.0 - strength) * seed.combined_score + strength * affinity;
            out.push(AssociatedHit {
                uid: seed.uid,
                title: seed.title,
                snippet: seed.snippet,
                hybrid_score: seed.combined_score,
                affinity,
                final_score,
            });
        }

        out.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        out.truncate(opts.limit);
        Ok(out)
    }

    /// Fails `InvalidRequest` when the session was never seen.
    pub fn reflect(&self, engine: &SearchEngine, session_id: &str) -> Result<SessionReflection> {
        let recent = self
            .get(session_id)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown session '{session_id}'")))?;

        let mut reflected = Vec::with_capacity(recent.len());
        for uid in recent {
            let title = engine.title_of(&uid)?;
            reflected.push(ReflectedNote { uid, title });
        }
        Ok(SessionReflection {
            session_id: session_id.to_string(),
            recent: reflected,
        })
    }
}

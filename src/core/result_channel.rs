// core/result_channel.rs
//! Corrélation requête/réponse par identifiant opaque.
//!
//! Chaque opération en vol est enregistrée une seule fois ; le premier
//! événement terminal la retire de la table et règle l'appelant. Les
//! événements arrivant ensuite pour le même identifiant sont ignorés.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::result::{ProgressCallback, ProgressUpdate, TransformOutput};
use crate::utils::error::{AppError, AppResult};

/// Identifiant opaque d'une opération
pub type OperationId = Uuid;

/// Opération en attente de règlement
struct PendingOperation {
    on_progress: Option<ProgressCallback>,
    settle_tx: oneshot::Sender<AppResult<TransformOutput>>,
}

/// Règlement attendu d'une opération enregistrée
#[derive(Debug)]
pub struct Settlement {
    id: OperationId,
    rx: oneshot::Receiver<AppResult<TransformOutput>>,
}

impl Settlement {
    pub fn id(&self) -> OperationId {
        self.id
    }
}

impl Future for Settlement {
    type Output = AppResult<TransformOutput>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(AppError::ChannelFault(format!(
                    "operation {} dropped without settlement",
                    id
                )))
            })
        })
    }
}

/// Table des opérations en vol d'un canal
#[derive(Default)]
pub struct ResultChannel {
    pending: Mutex<HashMap<OperationId, PendingOperation>>,
}

impl ResultChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<OperationId, PendingOperation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enregistre une opération ; un identifiant déjà en vol est une erreur de programmation
    pub fn register(
        &self,
        id: OperationId,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<Settlement> {
        let mut table = self.table();
        if table.contains_key(&id) {
            return Err(AppError::DuplicateOperation(id));
        }

        let (settle_tx, rx) = oneshot::channel();
        table.insert(id, PendingOperation { on_progress, settle_tx });
        Ok(Settlement { id, rx })
    }

    /// Transmet une progression ; sans effet pour un identifiant inconnu
    pub fn deliver_progress(&self, id: OperationId, update: ProgressUpdate) {
        // Le callback est appelé hors du verrou
        let callback = self
            .table()
            .get(&id)
            .and_then(|pending| pending.on_progress.clone());

        match callback {
            Some(callback) => callback(update),
            None => debug!("Progression ignorée pour l'opération {} (inconnue ou sans callback)", id),
        }
    }

    /// Règle une opération exactement une fois ; renvoie `false` si déjà réglée ou inconnue
    pub fn settle(&self, id: OperationId, outcome: AppResult<TransformOutput>) -> bool {
        let pending = self.table().remove(&id);

        match pending {
            Some(pending) => {
                // L'appelant a pu abandonner l'attente, ce n'est pas une erreur
                let _ = pending.settle_tx.send(outcome);
                true
            }
            None => {
                debug!("Événement terminal en double ignoré pour l'opération {}", id);
                false
            }
        }
    }

    /// Rejette toutes les opérations en vol et vide la table
    pub fn reject_all(&self, reason: AppError) -> usize {
        let drained: Vec<(OperationId, PendingOperation)> = self.table().drain().collect();
        let count = drained.len();

        if count > 0 {
            warn!("⚠️  {} opérations rejetées: {}", count, reason);
        }

        for (_, pending) in drained {
            let _ = pending.settle_tx.send(Err(reason.clone()));
        }

        count
    }

    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    pub fn is_pending(&self, id: &OperationId) -> bool {
        self.table().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording_callback() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
            sink.lock().unwrap().push(update.percent);
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn test_register_and_settle() {
        let channel = ResultChannel::new();
        let id = Uuid::new_v4();
        let settlement = channel.register(id, None).unwrap();
        assert!(channel.is_pending(&id));

        assert!(channel.settle(id, Ok(TransformOutput::new(vec![1, 2, 3], 10))));
        assert_eq!(channel.pending_count(), 0);

        let output = settlement.await.unwrap();
        assert_eq!(output.transformed_size, 3);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let channel = ResultChannel::new();
        let id = Uuid::new_v4();
        let _first = channel.register(id, None).unwrap();
        let second = channel.register(id, None);
        assert!(matches!(second, Err(AppError::DuplicateOperation(dup)) if dup == id));
    }

    #[tokio::test]
    async fn test_second_settle_is_noop() {
        let channel = ResultChannel::new();
        let id = Uuid::new_v4();
        let settlement = channel.register(id, None).unwrap();

        assert!(channel.settle(id, Err(AppError::Cancelled("aborted".into()))));
        assert!(!channel.settle(id, Ok(TransformOutput::new(vec![], 0))));

        assert!(matches!(settlement.await, Err(AppError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_progress_routing_without_cross_talk() {
        let channel = ResultChannel::new();
        let (cb_a, seen_a) = recording_callback();
        let (cb_b, seen_b) = recording_callback();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let _a = channel.register(id_a, Some(cb_a)).unwrap();
        let _b = channel.register(id_b, Some(cb_b)).unwrap();

        channel.deliver_progress(id_a, ProgressUpdate::new(10, "a"));
        channel.deliver_progress(id_b, ProgressUpdate::new(20, "b"));
        channel.deliver_progress(id_a, ProgressUpdate::new(30, "a"));
        // Identifiant étranger : sans effet
        channel.deliver_progress(Uuid::new_v4(), ProgressUpdate::new(99, "x"));

        assert_eq!(*seen_a.lock().unwrap(), vec![10, 30]);
        assert_eq!(*seen_b.lock().unwrap(), vec![20]);

        // Après règlement, plus aucune progression n'est livrée
        channel.settle(id_a, Ok(TransformOutput::new(vec![], 0)));
        channel.deliver_progress(id_a, ProgressUpdate::new(50, "late"));
        assert_eq!(*seen_a.lock().unwrap(), vec![10, 30]);
    }

    #[tokio::test]
    async fn test_reject_all_settles_everything() {
        let channel = ResultChannel::new();
        let first = channel.register(Uuid::new_v4(), None).unwrap();
        let second = channel.register(Uuid::new_v4(), None).unwrap();

        let rejected = channel.reject_all(AppError::Cancelled("worker terminated".into()));
        assert_eq!(rejected, 2);
        assert_eq!(channel.pending_count(), 0);

        assert!(matches!(first.await, Err(AppError::Cancelled(_))));
        assert!(matches!(second.await, Err(AppError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_dropped_table_yields_channel_fault() {
        let channel = ResultChannel::new();
        let settlement = channel.register(Uuid::new_v4(), None).unwrap();
        drop(channel);
        assert!(matches!(settlement.await, Err(AppError::ChannelFault(_))));
    }
}

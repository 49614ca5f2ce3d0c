//! Batched-publication resolver.
//!
//! Providers publish many deals in one `PublishStorageDeals` message and the
//! market assigns ids by position in the batch. The resolver finds our deal's
//! position by content (canonical encoding), never by trusting a claimed
//! index, and reads the id at that position from the execution receipt.
//!
//! ## Flow
//!
//! ```text
//! get_message → validate sender/recipient/method → decode batch → scan
//!     → wait_for_message → exit code → decode ids → ids[position]
//! ```
//!
//! Params are only decoded once the envelope checks pass.

use std::sync::Arc;

use dealtrack_types::{
    ClientDealProposal, DealId, DealtrackError, MessageId, MessageLookup, MessageWaiter,
    MinerStateReader, PublishStorageDealsParams, PublishStorageDealsReturn, Result, ResultExt,
    STORAGE_MARKET_ACTOR, methods,
};
use tracing::{info, warn};

/// Resolves a published proposal to its chain-assigned deal id.
pub struct PublicationResolver {
    messages: Arc<dyn MessageLookup>,
    miners: Arc<dyn MinerStateReader>,
    waiter: Arc<dyn MessageWaiter>,
}

impl PublicationResolver {
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageLookup>,
        miners: Arc<dyn MinerStateReader>,
        waiter: Arc<dyn MessageWaiter>,
    ) -> Self {
        Self {
            messages,
            miners,
            waiter,
        }
    }

    /// Find the id assigned to `deal` by the publish message `publish`.
    ///
    /// Suspends until the publish message is executed.
    ///
    /// # Errors
    /// - `MessageNotFound` if the chain doesn't know `publish`
    /// - `WrongSender`, `WrongRecipient`, `WrongMethod` if the message is not
    ///   a publish by the provider's worker
    /// - `NotInBatch` if the batch doesn't contain `deal`
    /// - `PublishFailed` if the message executed with a non-zero exit code
    /// - `MalformedReceipt` if the receipt's id list doesn't line up with the batch
    pub async fn resolve(&self, publish: &MessageId, deal: &ClientDealProposal) -> Result<DealId> {
        let msg = self
            .messages
            .get_message(publish)
            .await
            .context("getting deal publish message")?;

        let provider = deal.proposal.provider;
        let worker = self
            .miners
            .miner_worker(&provider, None)
            .await
            .with_context(|| format!("getting worker of {provider}"))?;

        if msg.from != worker {
            warn!(message = %publish, from = %msg.from, provider = %provider, "deal not published by provider");
            return Err(DealtrackError::WrongSender {
                expected: worker,
                actual: msg.from,
            });
        }
        if msg.to != STORAGE_MARKET_ACTOR {
            warn!(message = %publish, to = %msg.to, "deal publish not sent to market actor");
            return Err(DealtrackError::WrongRecipient {
                expected: STORAGE_MARKET_ACTOR,
                actual: msg.to,
            });
        }
        if msg.method != methods::market::PUBLISH_STORAGE_DEALS {
            warn!(message = %publish, method = %msg.method, "deal publish called wrong method");
            return Err(DealtrackError::WrongMethod {
                expected: methods::market::PUBLISH_STORAGE_DEALS,
                actual: msg.method,
            });
        }

        let params: PublishStorageDealsParams = msg
            .decode_params()
            .context("decoding publish params")?;
        let Some(index) = params.deals.iter().position(|d| d.same_content(deal)) else {
            warn!(message = %publish, batch = params.deals.len(), "deal missing from publish batch");
            return Err(DealtrackError::NotInBatch { message: *publish });
        };

        let (_, receipt) = self
            .waiter
            .wait_for_message(publish)
            .await
            .with_context(|| format!("waiting for deal publish {publish}"))?;
        if !receipt.exit_code.is_success() {
            warn!(message = %publish, exit_code = %receipt.exit_code, "deal publish failed");
            return Err(DealtrackError::PublishFailed {
                message: *publish,
                exit_code: receipt.exit_code,
            });
        }

        let ret: PublishStorageDealsReturn =
            receipt
                .decode_return()
                .map_err(|err| DealtrackError::MalformedReceipt {
                    reason: err.to_string(),
                })?;
        if ret.ids.len() != params.deals.len() {
            return Err(DealtrackError::MalformedReceipt {
                reason: format!(
                    "{} ids returned for a batch of {}",
                    ret.ids.len(),
                    params.deals.len()
                ),
            });
        }

        let deal_id = ret.ids[index];
        info!(deal = %deal_id, message = %publish, index, "resolved published deal");
        Ok(deal_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dealtrack_types::{
        Address, DealProposal, ErrorKind, ExitCode, MessageReceipt, Signature, encode_params,
        testkit::{MockChain, publish_message},
    };
    use rust_decimal::Decimal;

    use super::*;

    fn client() -> Address {
        Address([1u8; 32])
    }

    fn provider() -> Address {
        Address::actor(1000)
    }

    fn worker() -> Address {
        Address([0xee; 32])
    }

    fn proposal(seed: u8) -> ClientDealProposal {
        ClientDealProposal {
            proposal: DealProposal::dummy(client(), provider(), Decimal::ONE).with_piece(seed),
            client_signature: Signature(vec![seed; 64]),
        }
    }

    fn ids_receipt(ids: &[u64]) -> MessageReceipt {
        let ret = PublishStorageDealsReturn {
            ids: ids.iter().copied().map(DealId).collect(),
        };
        MessageReceipt::success(encode_params(&ret).unwrap())
    }

    fn setup() -> (Arc<MockChain>, PublicationResolver) {
        let chain = Arc::new(MockChain::new());
        chain.set_worker(provider(), worker());
        let resolver = PublicationResolver::new(chain.clone(), chain.clone(), chain.clone());
        (chain, resolver)
    }

    /// Publish `[B, A, C]` and execute it with ids 10, 11, 12.
    fn publish_bac(chain: &MockChain) -> MessageId {
        let msg = publish_message(worker(), vec![proposal(2), proposal(1), proposal(3)]);
        let id = chain.insert_message(msg);
        chain.include(id, ids_receipt(&[10, 11, 12]));
        id
    }

    #[tokio::test]
    async fn resolves_by_content_not_position() {
        let (chain, resolver) = setup();
        let publish = publish_bac(&chain);

        assert_eq!(resolver.resolve(&publish, &proposal(3)).await.unwrap(), DealId(12));
        assert_eq!(resolver.resolve(&publish, &proposal(1)).await.unwrap(), DealId(11));
    }

    #[tokio::test]
    async fn missing_proposal_is_not_in_batch() {
        let (chain, resolver) = setup();
        let publish = publish_bac(&chain);

        let err = resolver.resolve(&publish, &proposal(9)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInBatch);
    }

    #[tokio::test]
    async fn signature_is_part_of_content() {
        let (chain, resolver) = setup();
        let publish = publish_bac(&chain);

        let mut forged = proposal(3);
        forged.client_signature = Signature(vec![0; 64]);
        let err = resolver.resolve(&publish, &forged).await.unwrap_err();
        assert!(matches!(err, DealtrackError::NotInBatch { .. }));
    }

    #[tokio::test]
    async fn wrong_method_rejected_before_decoding() {
        let (chain, resolver) = setup();
        let mut msg = publish_message(worker(), vec![proposal(1)]);
        msg.method = methods::market::ADD_BALANCE;
        msg.params = b"not a batch".to_vec();
        let publish = chain.insert_message(msg);

        let err = resolver.resolve(&publish, &proposal(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(err, DealtrackError::WrongMethod { .. }));
    }

    #[tokio::test]
    async fn publish_from_other_sender_rejected() {
        let (chain, resolver) = setup();
        let msg = publish_message(Address([0x66; 32]), vec![proposal(1)]);
        let publish = chain.insert_message(msg);

        let err = resolver.resolve(&publish, &proposal(1)).await.unwrap_err();
        assert!(matches!(
            err,
            DealtrackError::WrongSender { expected, .. } if expected == worker()
        ));
    }

    #[tokio::test]
    async fn publish_to_other_actor_rejected() {
        let (chain, resolver) = setup();
        let mut msg = publish_message(worker(), vec![proposal(1)]);
        msg.to = Address::actor(99);
        let publish = chain.insert_message(msg);

        let err = resolver.resolve(&publish, &proposal(1)).await.unwrap_err();
        assert!(matches!(err, DealtrackError::WrongRecipient { .. }));
    }

    #[tokio::test]
    async fn unknown_message_not_found() {
        let (_, resolver) = setup();
        let err = resolver
            .resolve(&MessageId([3u8; 32]), &proposal(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(err.root(), DealtrackError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_provider_not_found() {
        let (chain, resolver) = setup();
        let publish = publish_bac(&chain);
        let mut deal = proposal(1);
        deal.proposal.provider = Address::actor(2000);

        let err = resolver.resolve(&publish, &deal).await.unwrap_err();
        assert!(matches!(err.root(), DealtrackError::ActorNotFound(_)));
    }

    #[tokio::test]
    async fn failed_publish_is_execution_failure() {
        let (chain, resolver) = setup();
        let publish = chain.insert_message(publish_message(worker(), vec![proposal(1)]));
        chain.include(publish, MessageReceipt::failure(ExitCode(19)));

        let err = resolver.resolve(&publish, &proposal(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
        assert!(matches!(
            err,
            DealtrackError::PublishFailed { exit_code: ExitCode(19), .. }
        ));
    }

    #[tokio::test]
    async fn short_id_list_is_malformed() {
        let (chain, resolver) = setup();
        let msg = publish_message(worker(), vec![proposal(2), proposal(1), proposal(3)]);
        let publish = chain.insert_message(msg);
        chain.include(publish, ids_receipt(&[10, 11]));

        let err = resolver.resolve(&publish, &proposal(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedReceipt);
    }

    #[tokio::test]
    async fn undecodable_return_is_malformed() {
        let (chain, resolver) = setup();
        let publish = chain.insert_message(publish_message(worker(), vec![proposal(1)]));
        chain.include(publish, MessageReceipt::success(b"???".to_vec()));

        let err = resolver.resolve(&publish, &proposal(1)).await.unwrap_err();
        assert!(matches!(err, DealtrackError::MalformedReceipt { .. }));
    }

    #[tokio::test]
    async fn waits_for_execution() {
        let (chain, resolver) = setup();
        let resolver = Arc::new(resolver);
        let publish = chain.insert_message(publish_message(worker(), vec![proposal(1)]));

        let task = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(&publish, &proposal(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        chain.include(publish, ids_receipt(&[77]));
        assert_eq!(task.await.unwrap().unwrap(), DealId(77));
    }
}

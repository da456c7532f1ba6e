use futures::future::{BoxFuture, join, join_all};
use futures_timer::Delay;

use crate::form::{Form, FormResult, ValidationTicket, read_lock, write_lock};
use crate::value::{ErrorTree, Value};

impl Form {
    /// Validates one own key: the sync phase publishes its failure
    /// immediately; the async phase is entered only when sync passed, after
    /// any configured debounce, and its result is published only if this
    /// request is still the key's latest. Returns the key's validity as of
    /// this call; resolves even when rules fail.
    pub async fn validate_field(&self, key: &str) -> FormResult<bool> {
        self.expect_own_key(key)?;
        let ticket = self.bump_ticket(key)?;
        let Some(def) = self.inner.leaves.get(key) else {
            // expect_own_key guarantees presence; keep the boundary total
            return Ok(true);
        };
        let value = self.current_own_value(key);

        let sync_tree = def.check_sync(&value);
        if !sync_tree.is_valid() {
            self.finish_validation(key, ticket, sync_tree)?;
            return Ok(false);
        }
        if !def.has_async_rules() {
            self.finish_validation(key, ticket, ErrorTree::clean())?;
            return Ok(true);
        }

        self.update_meta(key, |meta| meta.validating = true);
        if let Some(debounce) = def.debounce() {
            Delay::new(debounce).await;
            if !self.is_latest_ticket(key, ticket)? {
                return Ok(self.field_currently_valid(key));
            }
        }

        let state = self.values();
        let tree = def.check_async(&value, &state).await;
        let valid = tree.is_valid();
        if self.finish_validation(key, ticket, tree)? {
            Ok(valid)
        } else {
            Ok(self.field_currently_valid(key))
        }
    }

    /// Whole-tree validation: every own key's full sync+async chain fans out
    /// in parallel and fans in to one atomic replacement of the own-errors
    /// map; every nested form validates concurrently and publishes through
    /// its own error container as it settles, independent of siblings.
    pub fn validate(&self) -> BoxFuture<'_, FormResult<bool>> {
        Box::pin(async move {
            let state = self.values();
            let mut stamped = Vec::with_capacity(self.inner.own_keys.len());
            for key in &self.inner.own_keys {
                stamped.push((key.clone(), self.bump_ticket(key)?));
                self.update_meta(key, |meta| meta.validating = true);
            }

            let own_futures = stamped.iter().map(|(key, _)| {
                let def = self.inner.leaves.get(key);
                let value = self.current_own_value(key);
                let state = &state;
                async move {
                    let Some(def) = def else {
                        return ErrorTree::clean();
                    };
                    let sync_tree = def.check_sync(&value);
                    if sync_tree.is_valid() {
                        def.check_async(&value, state).await
                    } else {
                        sync_tree
                    }
                }
            });
            let nested_futures = self.inner.nested.values().map(Form::validate);

            let (own_results, nested_results) =
                join(join_all(own_futures), join_all(nested_futures)).await;
            for result in nested_results {
                result?;
            }

            // Fan-in: one atomic batch, applied while the ticket table is
            // held so a field result published in the meantime cannot be
            // overwritten. A key whose ticket moved on during the batch
            // keeps its newer result instead.
            {
                let tickets = read_lock(&self.inner.tickets, "applying whole-tree validation")?;
                let mut own = self.inner.own_errors.lock_mut();
                for ((key, ticket), tree) in stamped.iter().zip(own_results) {
                    if tickets.get(key).copied() != Some(*ticket) {
                        continue;
                    }
                    if tree.is_valid() {
                        own.remove(key);
                    } else {
                        own.insert(key.clone(), tree);
                    }
                }
            }
            for (key, _) in &stamped {
                self.update_meta(key, |meta| meta.validating = false);
            }

            Ok(self.is_valid())
        })
    }

    fn current_own_value(&self, key: &str) -> Value {
        self.inner
            .own_state
            .lock_ref()
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn field_currently_valid(&self, key: &str) -> bool {
        !self.inner.own_errors.lock_ref().contains_key(key)
    }

    fn bump_ticket(&self, key: &str) -> FormResult<ValidationTicket> {
        let mut tickets = write_lock(&self.inner.tickets, "stamping validation request")?;
        let next = ValidationTicket(tickets.get(key).map_or(0, |ticket| ticket.0) + 1);
        tickets.insert(key.to_owned(), next);
        Ok(next)
    }

    fn is_latest_ticket(&self, key: &str, ticket: ValidationTicket) -> FormResult<bool> {
        Ok(
            read_lock(&self.inner.tickets, "checking latest validation ticket")?
                .get(key)
                .copied()
                == Some(ticket),
        )
    }

    /// Publishes a per-field result if `ticket` is still the key's latest.
    /// Returns whether the result was applied.
    fn finish_validation(
        &self,
        key: &str,
        ticket: ValidationTicket,
        tree: ErrorTree,
    ) -> FormResult<bool> {
        let tickets = read_lock(&self.inner.tickets, "finishing field validation")?;
        if tickets.get(key).copied() != Some(ticket) {
            return Ok(false);
        }
        {
            let mut own = self.inner.own_errors.lock_mut();
            if tree.is_valid() {
                own.remove(key);
            } else {
                own.insert(key.to_owned(), tree);
            }
        }
        drop(tickets);
        self.update_meta(key, |meta| meta.validating = false);
        Ok(true)
    }
}

//! Feed `price_update` messages into a [`PriceTable`]

use feedlink::{PriceUpdate, Subscription, SyncClient};
use tracing::trace;

use crate::table::PriceTable;

pub const PRICE_UPDATE: &str = "price_update";

/// Keep `table` current from the client's `price_update` stream.
///
/// Symbols absent from an update keep their previous price. Call
/// [`Subscription::unsubscribe`] on the returned handle to stop.
pub fn attach(client: &SyncClient, table: PriceTable) -> Subscription {
    client.subscribe(PRICE_UPDATE, move |data| {
        let update = PriceUpdate::from_value(data)?;
        let applied = table.apply_update(&update);
        trace!(applied, "Applied price update");
        Ok(())
    })
}

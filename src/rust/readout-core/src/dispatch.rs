// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;

use futures::future::try_join_all;
use readout_common::ModuleId;

use crate::Result;
use crate::module_map::ModuleMap;

/// Run one unit of work per module concurrently and wait for all of them.
///
/// The work items are polled within the calling task. Commands of a single
/// module stay sequential while distinct modules interleave at every await.
/// The first failure is returned and the remaining work is dropped.
pub(crate) async fn fan_out<W, T, F, Fut>(
    work: impl IntoIterator<Item = (ModuleId, W)>,
    mut f: F,
) -> Result<ModuleMap<T>>
where
    F: FnMut(ModuleId, W) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut modules = vec![];
    let futures: Vec<Fut> = work
        .into_iter()
        .map(|(module, item)| {
            modules.push(module);
            f(module, item)
        })
        .collect();
    let results = try_join_all(futures).await?;
    Ok(modules.into_iter().zip(results).collect())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Error;

    fn module(index: u8) -> ModuleId {
        ModuleId::new(index).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_modules_run_concurrently() {
        let start = tokio::time::Instant::now();
        let results = fan_out(
            [(module(2), 20u64), (module(1), 10)],
            |module, value| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(value + u64::from(module.index()))
            },
        )
        .await
        .unwrap();
        assert!(start.elapsed() < Duration::from_millis(1500));
        assert_eq!(results.get(module(1)), Some(&11));
        assert_eq!(results.get(module(2)), Some(&22));
    }

    #[tokio::test]
    async fn test_failure_aborts_all() {
        let result = fan_out([(module(1), 1), (module(2), 2)], |_, value| async move {
            if value == 2 {
                Err(Error::new("boom"))
            } else {
                Ok(value)
            }
        })
        .await;
        assert!(result.is_err());
    }
}

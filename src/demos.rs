use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use serde_json::{json, Value};

use flowdag_core::{fn_node, Chooser, FlowError, Node, Result, RunContext};
use flowdag_engine::{FlowRunner, NodeDecl};

pub const WORKFLOWS: &[&str] = &["diamond", "ranking"];

/// Input shared by every demo workflow.
#[derive(Debug, Clone)]
pub struct Request {
    pub user: String,
    pub candidates: usize,
}

impl Request {
    pub fn new(user: impl Into<String>, candidates: usize) -> Self {
        Self {
            user: user.into(),
            candidates,
        }
    }

    fn is_new_user(&self) -> bool {
        self.user.bytes().map(u32::from).sum::<u32>() % 2 == 0
    }
}

/// IO-bound stand-in: sleeps for a jittered latency, then runs `then`.
struct SimulatedCall<F> {
    base_ms: u64,
    then: F,
}

impl<F> Node<Request> for SimulatedCall<F>
where
    F: Fn(&Request, &RunContext) -> Result<Option<Value>> + Send + Sync + 'static,
{
    fn execute<'a>(
        &'a self,
        input: &'a Request,
        ctx: &'a RunContext,
        _node_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        let jitter = rand::thread_rng().gen_range(0..=self.base_ms / 2 + 1);
        let latency = Duration::from_millis(self.base_ms + jitter);
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            (self.then)(input, ctx)
        })
    }
}

fn simulated<F>(base_ms: u64, then: F) -> Arc<dyn Node<Request>>
where
    F: Fn(&Request, &RunContext) -> Result<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(SimulatedCall { base_ms, then })
}

fn number(ctx: &RunContext, node: &str) -> Result<i64> {
    ctx.node_value(node)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| FlowError::node(format!("{node} produced no number")))
}

/// `a -> {b, c} -> d`: b is IO, c is CPU, both run in the same wave.
pub fn diamond() -> Vec<NodeDecl<Request>> {
    vec![
        NodeDecl::new("a", fn_node(|req: &Request, _ctx: &RunContext, _id: &str| {
            Ok(Some(json!(req.candidates as i64)))
        }))
        .start(),
        NodeDecl::new("b", simulated(5, |_req, ctx| Ok(Some(json!(number(ctx, "a")? * 2)))))
            .io()
            .depends_on(["a"]),
        NodeDecl::new("c", fn_node(|_req: &Request, ctx: &RunContext, _id: &str| {
            Ok(Some(json!(number(ctx, "a")? + 1)))
        }))
        .depends_on(["a"]),
        NodeDecl::new("d", fn_node(|_req: &Request, ctx: &RunContext, _id: &str| {
            Ok(Some(json!(number(ctx, "b")? + number(ctx, "c")?)))
        }))
        .depends_on(["b", "c"])
        .end(),
    ]
}

/// Candidate ranking with a routing decision.
///
/// `route` keeps exactly one scoring branch alive; `rerank` joins the
/// branches weakly, so it runs after whichever survived.
pub fn ranking() -> Vec<NodeDecl<Request>> {
    let router: Arc<dyn Chooser<Request>> = Arc::new(|_req: &Request, ctx: &RunContext| {
        let branch = match ctx.get_str("segment").as_deref() {
            Some("new") => "white_box",
            _ => "model_score",
        };
        HashSet::from([branch.to_string()])
    });

    vec![
        NodeDecl::new(
            "recall",
            simulated(8, |req, ctx| {
                let ids: Vec<usize> = (0..req.candidates).collect();
                ctx.put_data("candidates", json!(ids));
                Ok(Some(json!(ids.len())))
            }),
        )
        .io()
        .start(),
        NodeDecl::new(
            "profile",
            simulated(4, |req, ctx| {
                let segment = if req.is_new_user() { "new" } else { "returning" };
                ctx.set_str("segment", segment);
                Ok(Some(json!(segment)))
            }),
        )
        .io(),
        NodeDecl::new("route", fn_node(|_req: &Request, ctx: &RunContext, _id: &str| {
            Ok(ctx.get_data("segment"))
        }))
        .depends_on(["recall", "profile"])
        .with_chooser(router),
        NodeDecl::new("white_box", fn_node(|_req: &Request, ctx: &RunContext, _id: &str| {
            let scores: Vec<Value> = candidates(ctx)?
                .into_iter()
                .rev()
                .enumerate()
                .map(|(rank, id)| json!({ "id": id, "score": rank as i64 }))
                .collect();
            ctx.put_data("scores", json!(scores));
            Ok(Some(json!("white_box")))
        }))
        .depends_on(["route"]),
        NodeDecl::new("model_score", fn_node(|_req: &Request, ctx: &RunContext, _id: &str| {
            let scores: Vec<Value> = candidates(ctx)?
                .into_iter()
                .map(|id| json!({ "id": id, "score": (id * 7 % 13) as i64 }))
                .collect();
            ctx.put_data("scores", json!(scores));
            Ok(Some(json!("model_score")))
        }))
        .depends_on(["route"]),
        NodeDecl::new("rerank", fn_node(|_req: &Request, ctx: &RunContext, _id: &str| {
            let mut scores = ctx
                .get_data("scores")
                .and_then(|v| v.as_array().cloned())
                .ok_or_else(|| FlowError::node("no scores to rerank"))?;
            scores.sort_by_key(|s| std::cmp::Reverse(s["score"].as_i64().unwrap_or_default()));
            scores.truncate(3);
            Ok(Some(Value::Array(scores)))
        }))
        .weak_depends_on(["white_box", "model_score"])
        .end(),
        NodeDecl::new("impression_log", simulated(2, |_req, ctx| {
            Ok(Some(json!(candidates(ctx)?.len())))
        }))
        .io()
        .depends_on(["recall"])
        .end(),
    ]
}

fn candidates(ctx: &RunContext) -> Result<Vec<u64>> {
    let list = ctx
        .get_data("candidates")
        .ok_or_else(|| FlowError::node("candidates not recalled"))?;
    Ok(serde_json::from_value(list)?)
}

pub fn register_all(runner: &FlowRunner<Request>) -> Result<()> {
    runner.register("diamond", diamond())?;
    runner.register("ranking", ranking())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdag_core::config::{EngineConfig, EvictionConfig, PoolSizing};
    use flowdag_core::EngineState;
    use flowdag_engine::{CollectionPool, ContextPool, Executors, RunOptions};

    fn runner() -> FlowRunner<Request> {
        let sizing = PoolSizing {
            max_size: 4,
            initial_size: 0,
            min_idle: 0,
        };
        let eviction = EvictionConfig::default();
        let runner = FlowRunner::with_pools(
            EngineConfig::default(),
            Executors::try_current().unwrap(),
            ContextPool::new(sizing, &eviction),
            CollectionPool::new(sizing, &eviction),
        );
        register_all(&runner).unwrap();
        runner
    }

    #[tokio::test]
    async fn test_diamond_sums_branches() {
        let runner = runner();
        let ctx = Arc::new(RunContext::new());
        let outcome = runner
            .run_with_context("diamond", Arc::new(Request::new("u", 10)), &ctx, RunOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, EngineState::Finish);
        assert_eq!(ctx.node_value("d"), Some(json!(31)));
    }

    #[tokio::test]
    async fn test_ranking_routes_by_segment() {
        let runner = runner();
        // "b" sums to 98: even, so a new user.
        let ctx = Arc::new(RunContext::new());
        let outcome = runner
            .run_with_context("ranking", Arc::new(Request::new("b", 5)), &ctx, RunOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, EngineState::Finish);
        assert!(outcome.pruned.contains("model_score"));
        assert_eq!(ctx.node_value("white_box"), Some(json!("white_box")));
        let top = ctx.node_value("rerank").unwrap();
        assert_eq!(top.as_array().map(Vec::len), Some(3));
        assert_eq!(top[0]["id"], json!(0));

        // "a" sums to 97: odd, so a returning user.
        let ctx = Arc::new(RunContext::new());
        let outcome = runner
            .run_with_context("ranking", Arc::new(Request::new("a", 5)), &ctx, RunOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, EngineState::Finish);
        assert!(outcome.pruned.contains("white_box"));
        assert!(ctx.result("white_box").unwrap().is_skipped());
        assert_eq!(ctx.node_value("impression_log"), Some(json!(5)));
    }
}

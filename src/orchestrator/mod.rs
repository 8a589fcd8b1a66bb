//! 会话编排器
//!
//! 入口 handle_user_input：意图分类后路由到建计划、恢复执行、修改计划、
//! 澄清问答、取消或闲聊。执行循环逐步骤驱动 StructuredAgent，在每个
//! 步骤边界检查暂停标志，每次状态变更后持久化；步骤失败会暂停会话，
//! 恢复时跳过失败步骤继续后面的待执行步骤。

use std::sync::Arc;

use uuid::Uuid;

use futures_util::StreamExt;

use crate::agent::{AgentOutcome, StructuredAgent, TaskContext};
use crate::core::events::{emit, AgentEvent, EventSender};
use crate::core::SessionSignals;
use crate::intent::{IntentKind, IntentRouter};
use crate::llm::LlmClient;
use crate::memory::{Message, SessionStore};
use crate::observability::DebugSink;
use crate::plan::{ExecutionPlan, Planning, SessionState, StepStatus};
use crate::protocol::truncate_middle;

/// 编排器的注入组件
pub struct OrchestratorParts {
    pub planner: Arc<dyn Planning>,
    pub agent: StructuredAgent,
    pub router: IntentRouter,
    pub llm: Arc<dyn LlmClient>,
    pub store: SessionStore,
    pub signals: Arc<SessionSignals>,
    pub events: EventSender,
    pub debug: Arc<dyn DebugSink>,
    pub max_context_turns: usize,
    pub recent_context_chars: usize,
    pub older_context_chars: usize,
}

/// 会话编排器：持有会话状态与全部协作组件
pub struct Orchestrator {
    state: SessionState,
    planner: Arc<dyn Planning>,
    agent: StructuredAgent,
    router: IntentRouter,
    llm: Arc<dyn LlmClient>,
    store: SessionStore,
    signals: Arc<SessionSignals>,
    events: EventSender,
    debug: Arc<dyn DebugSink>,
    max_context_turns: usize,
    recent_context_chars: usize,
    older_context_chars: usize,
}

const APPROVAL_WORDS: &[&str] = &[
    "yes", "y", "ok", "okay", "go", "go ahead", "proceed", "approve", "approved", "continue",
    "run", "run it", "lgtm", "好", "可以", "继续", "执行", "开始", "没问题",
];

const REJECTION_WORDS: &[&str] = &["no", "stop", "reject", "cancel", "abort", "不要", "取消", "算了"];

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            state: SessionState::default(),
            planner: parts.planner,
            agent: parts.agent,
            router: parts.router,
            llm: parts.llm,
            store: parts.store,
            signals: parts.signals,
            events: parts.events,
            debug: parts.debug,
            max_context_turns: parts.max_context_turns,
            recent_context_chars: parts.recent_context_chars,
            older_context_chars: parts.older_context_chars,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn signals(&self) -> Arc<SessionSignals> {
        self.signals.clone()
    }

    /// 从持久化存储恢复会话。恢复成功时对外重放计划快照；
    /// 仍有未完成步骤的计划标记为暂停，等用户明确恢复再执行。
    pub async fn restore(&mut self) -> bool {
        match self.store.load().await {
            Some(mut state) => {
                if let Some(plan) = &state.plan {
                    emit(Some(&self.events), AgentEvent::PlanUpdated { plan: plan.clone() });
                    if !plan.all_done() {
                        state.is_paused = true;
                    }
                }
                self.state = state;
                true
            }
            None => false,
        }
    }

    /// 主入口：分类并路由一条用户输入
    pub async fn handle_user_input(&mut self, input: &str) {
        if self.state.waiting_for_input && self.state.plan.is_some() {
            self.handle_user_feedback(input).await;
            return;
        }

        let analysis = self.router.analyze(input, self.state.plan.as_ref()).await;
        self.debug.debug(
            "route",
            serde_json::json!({
                "interaction_id": self.state.interaction_id,
                "intent": analysis.intent,
                "input": input,
            }),
        );

        match analysis.intent {
            IntentKind::NewTask => {
                self.start_new_task(input, &analysis.refined_prompt, analysis.show_plan_only)
                    .await
            }
            IntentKind::ContinueTask => self.continue_task(input, &analysis.refined_prompt).await,
            IntentKind::ModifyCurrent => {
                self.apply_feedback(input, &analysis.refined_prompt).await
            }
            IntentKind::Clarification => {
                self.answer_question(input, &analysis.refined_prompt).await
            }
            IntentKind::Cancel => self.cancel_task().await,
            IntentKind::Chat => self.handle_chat(input, &analysis.refined_prompt).await,
        }
    }

    /// 新任务：生成计划，视批准要求决定立即执行还是等待用户确认
    async fn start_new_task(&mut self, input: &str, refined: &str, show_plan_only: bool) {
        let plan = self.planner.create_plan(input, refined).await;

        self.state = SessionState {
            interaction_id: Uuid::new_v4().to_string(),
            plan: Some(plan.clone()),
            chat_history: vec![
                Message::user(input),
                Message::assistant(plan.render_markdown()),
            ],
            is_paused: false,
            waiting_for_input: false,
        };
        self.signals.resume();
        emit(Some(&self.events), AgentEvent::PlanCreated { plan: plan.clone() });

        if show_plan_only || plan.requires_approval {
            self.state.is_paused = true;
            self.state.waiting_for_input = true;
            emit(Some(&self.events), AgentEvent::PlanApprovalNeeded { plan });
            self.persist().await;
            return;
        }

        self.persist().await;
        self.execution_loop().await;
    }

    /// 处理等待批准 / 等待反馈时的用户输入
    async fn handle_user_feedback(&mut self, input: &str) {
        let normalized = input.trim().to_lowercase();
        if REJECTION_WORDS.iter().any(|w| normalized == *w) {
            self.cancel_task().await;
            return;
        }

        self.state.waiting_for_input = false;
        self.state.is_paused = false;
        self.signals.resume();

        let is_approval = APPROVAL_WORDS.iter().any(|w| normalized == *w);
        if !is_approval {
            // 反馈即修改：重规划未完成部分后继续
            if let Some(plan) = self.state.plan.clone() {
                let updated = self.planner.modify_plan(&plan, input).await;
                emit(Some(&self.events), AgentEvent::PlanUpdated { plan: updated.clone() });
                self.state.plan = Some(updated);
            }
        }

        self.persist().await;
        self.execution_loop().await;
    }

    /// 继续当前任务：有计划则按输入追加步骤后推进，无计划当作新任务
    async fn continue_task(&mut self, input: &str, refined: &str) {
        let Some(plan) = self.state.plan.clone() else {
            self.start_new_task(input, refined, false).await;
            return;
        };
        // 规划器吃精炼后的指令（指代已消解），历史里保留原话
        let updated = self.planner.extend_plan(&plan, refined).await;
        emit(Some(&self.events), AgentEvent::PlanUpdated { plan: updated.clone() });
        self.state.chat_history.push(Message::user(input));
        self.state
            .chat_history
            .push(Message::assistant(updated.render_markdown()));
        self.state.plan = Some(updated);
        self.state.is_paused = false;
        self.signals.resume();
        self.persist().await;
        self.execution_loop().await;
    }

    /// 恢复被暂停的计划
    pub async fn resume_task(&mut self) {
        let Some(plan) = self.state.plan.clone() else {
            emit(
                Some(&self.events),
                AgentEvent::Error {
                    text: "No active plan to continue.".to_string(),
                },
            );
            return;
        };
        self.state.is_paused = false;
        self.state.waiting_for_input = false;
        self.signals.resume();
        emit(Some(&self.events), AgentEvent::PlanUpdated { plan });
        self.persist().await;
        self.execution_loop().await;
    }

    /// 用户反馈修改计划的未完成部分
    async fn apply_feedback(&mut self, input: &str, refined: &str) {
        let Some(plan) = self.state.plan.clone() else {
            self.answer_question(input, refined).await;
            return;
        };
        let updated = self.planner.modify_plan(&plan, refined).await;
        emit(Some(&self.events), AgentEvent::PlanUpdated { plan: updated.clone() });
        self.state.chat_history.push(Message::user(input));
        self.state
            .chat_history
            .push(Message::assistant(updated.render_markdown()));
        self.state.plan = Some(updated);
        self.persist().await;
        if !self.state.is_paused {
            self.execution_loop().await;
        }
    }

    /// 取消当前任务：清空全部会话状态与持久化文件
    pub async fn cancel_task(&mut self) {
        self.state = SessionState::default();
        self.signals.resume();
        self.store.clear().await;
        emit(Some(&self.events), AgentEvent::PlanCancelled);
    }

    /// 回答关于计划 / 结果的问题，不推进执行
    async fn answer_question(&mut self, input: &str, refined: &str) {
        let context = IntentRouter::plan_context(self.state.plan.as_ref());
        let mut messages = vec![Message::system(format!(
            "You are a helpful assistant inside a task session. Session context:\n{}",
            context
        ))];
        messages.extend(self.recent_history());
        messages.push(Message::user(refined));

        let response = self
            .stream_reply(&messages, |text| AgentEvent::ClarificationChunk { text })
            .await;
        emit(
            Some(&self.events),
            AgentEvent::ClarificationComplete {
                response: response.clone(),
            },
        );
        self.state.chat_history.push(Message::user(input));
        self.state.chat_history.push(Message::assistant(response));
        self.persist().await;
    }

    /// 闲聊，不涉及计划
    async fn handle_chat(&mut self, input: &str, refined: &str) {
        let mut messages = vec![Message::system(
            "You are a friendly, concise assistant.".to_string(),
        )];
        messages.extend(self.recent_history());
        messages.push(Message::user(refined));

        let response = self
            .stream_reply(&messages, |text| AgentEvent::ChatChunk { text })
            .await;
        emit(
            Some(&self.events),
            AgentEvent::ChatComplete {
                response: response.clone(),
            },
        );
        self.state.chat_history.push(Message::user(input));
        self.state.chat_history.push(Message::assistant(response));
        self.persist().await;
    }

    /// 流式产出回复；chunk 通过 make_event 转为事件，失败时返回致歉文案
    async fn stream_reply(
        &self,
        messages: &[Message],
        make_event: impl Fn(String) -> AgentEvent,
    ) -> String {
        let mut full = String::new();
        match self.llm.complete_stream(messages).await {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(text) => {
                            emit(Some(&self.events), make_event(text.clone()));
                            full.push_str(&text);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "stream interrupted");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "llm stream failed");
            }
        }
        if full.is_empty() {
            full = "Sorry, I could not produce a response right now.".to_string();
        }
        full
    }

    fn recent_history(&self) -> Vec<Message> {
        let history = &self.state.chat_history;
        let skip = history.len().saturating_sub(self.max_context_turns);
        history[skip..].to_vec()
    }

    /// 执行循环：顺序推进待执行步骤，步骤边界检查暂停，变更即持久化
    async fn execution_loop(&mut self) {
        let step_count = match &self.state.plan {
            Some(p) => p.steps.len(),
            None => return,
        };

        for index in 0..step_count {
            if self.signals.is_paused() || self.state.is_paused {
                self.state.is_paused = true;
                self.persist().await;
                return;
            }

            let (step_id, title, description, status) = {
                let Some(plan) = self.state.plan.as_ref() else { return };
                let step = &plan.steps[index];
                (
                    step.id.clone(),
                    step.title.clone(),
                    step.description.clone(),
                    step.status,
                )
            };
            if !matches!(status, StepStatus::Pending | StepStatus::InProgress) {
                continue;
            }

            self.set_step_status(index, StepStatus::InProgress);
            if let Some(plan) = &self.state.plan {
                emit(
                    Some(&self.events),
                    AgentEvent::StepStart {
                        step: plan.steps[index].clone(),
                    },
                );
            }
            self.persist().await;

            let token = self.signals.begin_scope();
            let context = self.build_step_context(index);
            let task = format!("{}\n\n{}", title, description);
            let history = self.recent_history();
            let interaction_id = self.state.interaction_id.clone();

            let ctx = TaskContext {
                history: &history,
                context: Some(&context),
                interaction_id: &interaction_id,
                step_id: &step_id,
                cancel: token,
                events: Some(&self.events),
            };
            let outcome = self.agent.run(&task, &ctx).await;

            match outcome {
                Ok(AgentOutcome::Completed(result)) => {
                    // 执行已经完成，期间到达的暂停请求在下一个边界生效
                    self.set_step_status(index, StepStatus::Done);
                    self.set_step_result(index, Some(result.clone()));
                    emit(
                        Some(&self.events),
                        AgentEvent::StepComplete {
                            id: step_id,
                            result,
                        },
                    );
                    self.persist().await;
                }
                Ok(AgentOutcome::Cancelled { partial }) => {
                    let marker = if partial.is_empty() {
                        "[PAUSED]".to_string()
                    } else {
                        format!("{} [PAUSED]", partial)
                    };
                    self.set_step_status(index, StepStatus::Pending);
                    self.set_step_result(index, Some(marker.clone()));
                    self.state.is_paused = true;
                    emit(
                        Some(&self.events),
                        AgentEvent::StepUpdate {
                            id: step_id,
                            status: "pending".to_string(),
                            result: Some(marker),
                        },
                    );
                    self.persist().await;
                    return;
                }
                Err(e) => {
                    let text = e.to_string();
                    self.set_step_status(index, StepStatus::Failed);
                    self.set_step_result(index, Some(text.clone()));
                    self.state.is_paused = true;
                    emit(
                        Some(&self.events),
                        AgentEvent::StepUpdate {
                            id: step_id.clone(),
                            status: "failed".to_string(),
                            result: Some(text.clone()),
                        },
                    );
                    emit(
                        Some(&self.events),
                        AgentEvent::Error {
                            text: format!(
                                "Step '{}' failed: {}. Resume to continue with the remaining steps.",
                                title, text
                            ),
                        },
                    );
                    self.persist().await;
                    return;
                }
            }
        }

        let all_done = self
            .state
            .plan
            .as_ref()
            .map(ExecutionPlan::all_done)
            .unwrap_or(false);
        if all_done {
            self.final_summary().await;
        }
    }

    fn set_step_status(&mut self, index: usize, status: StepStatus) {
        if let Some(plan) = self.state.plan.as_mut() {
            if let Some(step) = plan.steps.get_mut(index) {
                step.status = status;
            }
        }
    }

    fn set_step_result(&mut self, index: usize, result: Option<String>) {
        if let Some(plan) = self.state.plan.as_mut() {
            if let Some(step) = plan.steps.get_mut(index) {
                step.result = result;
            }
        }
    }

    /// 把已完成步骤的结果压缩成当前步骤的上下文。
    /// 最近两个完成步骤保留较多字符，更早的只留摘要额度。
    fn build_step_context(&self, upto: usize) -> String {
        let Some(plan) = &self.state.plan else {
            return String::new();
        };
        let done: Vec<(usize, &crate::plan::TaskStep)> = plan
            .steps
            .iter()
            .enumerate()
            .filter(|(i, s)| *i < upto && s.status == StepStatus::Done)
            .collect();
        if done.is_empty() {
            return format!("Goal: {}", plan.refined_goal);
        }

        let recent_cutoff = done.len().saturating_sub(2);
        let mut ctx = format!("Goal: {}\n\n## Completed steps\n", plan.refined_goal);
        for (pos, (_, step)) in done.iter().enumerate() {
            let budget = if pos >= recent_cutoff {
                self.recent_context_chars
            } else {
                self.older_context_chars
            };
            let result = step.result.as_deref().unwrap_or("(no output)");
            ctx.push_str(&format!(
                "### {}\n{}\n\n",
                step.title,
                truncate_middle(result, budget, budget / 2)
            ));
        }
        ctx
    }

    /// 全部步骤完成后生成收尾总结
    async fn final_summary(&mut self) {
        let Some(plan) = self.state.plan.clone() else {
            return;
        };
        let mut digest = format!("Goal: {}\n\nStep results:\n", plan.refined_goal);
        for step in &plan.steps {
            digest.push_str(&format!(
                "- {}: {}\n",
                step.title,
                truncate_middle(step.result.as_deref().unwrap_or("(skipped)"), 600, 300)
            ));
        }

        let messages = vec![
            Message::system(
                "Summarize the completed task for the user: what was done and any follow-ups. Be concise."
                    .to_string(),
            ),
            Message::user(digest),
        ];

        emit(
            Some(&self.events),
            AgentEvent::ChatChunk {
                text: "\n\n---\n### Execution Summary\n\n".to_string(),
            },
        );
        let summary = self
            .stream_reply(&messages, |text| AgentEvent::ChatChunk { text })
            .await;
        emit(
            Some(&self.events),
            AgentEvent::ChatComplete {
                response: summary.clone(),
            },
        );
        self.state.chat_history.push(Message::assistant(summary));
        self.persist().await;
    }

    async fn persist(&self) {
        self.store.save(&self.state).await;
    }
}

//! Prompt templates for every LLM call site.
//!
//! All prompts are assembled here so the call sites stay readable and the
//! formats stay testable.  Budgets are expressed in content characters,
//! which is also how the agents measure prompt size.

/// Title-filter prompt for one document batch.
pub fn filter_titles_prompt(
    trigger_time: &str,
    titles_to_select: usize,
    titles_context: &str,
    language: &str,
) -> String {
    format!(
        "You are a market information analyst. The current time is {trigger_time}.\n\
         Below is a list of document titles with their IDs and publish times:\n\n\
         {titles_context}\n\
         Select at most {titles_to_select} documents that are most valuable for judging \
         near-term market opportunities. Prefer concrete, recent, market-moving facts over \
         opinion pieces and duplicates.\n\n\
         Reply with the selected IDs only, comma-separated, e.g.: 1,4,7\n\
         Answer in {language}."
    )
}

/// Content-summary prompt for one filtered batch.
pub fn summarize_docs_prompt(
    trigger_time: &str,
    bias_instruction: &str,
    summary_style: &str,
    doc_context: &str,
    summary_target_tokens: usize,
    language: &str,
) -> String {
    format!(
        "You are a market information analyst. The current time is {trigger_time}.\n\
         Below are the selected documents, each wrapped as <doc id=N>...</doc>:\n\n\
         {doc_context}\n\
         Write a {summary_style} of these documents. {bias_instruction}.\n\
         Cite every fact with the source document id in square brackets, e.g. [3]. \
         Only cite ids that appear above. Keep the summary under \
         {summary_target_tokens} characters.\n\
         Answer in {language}."
    )
}

/// Merge prompt combining all batch summaries into the final factor.
pub fn merge_summaries_prompt(
    trigger_time: &str,
    goal_instruction: &str,
    combined_summary: &str,
    summary_focus: &str,
    final_description: &str,
    final_target_tokens: usize,
    language: &str,
) -> String {
    format!(
        "You are a market information analyst. The current time is {trigger_time}.\n\
         Below are summaries produced from several document batches:\n\n\
         {combined_summary}\n\n\
         {goal_instruction}. Merge them into one \"{final_description}\". {summary_focus}. \
         Preserve the [N] citations of the facts you keep and do not invent new ids. \
         Keep the result under {final_target_tokens} characters.\n\
         Answer in {language}."
    )
}

/// Planning prompt run once before the ReAct loop.
pub fn research_plan_prompt(
    current_time: &str,
    task: &str,
    background_information: &str,
    tools_info: &str,
    output_language: &str,
) -> String {
    format!(
        "The current time is {current_time}.\n\n\
         Your task:\n{task}\n\n\
         Background information:\n{background_information}\n\n\
         Available tools (JSON):\n{tools_info}\n\n\
         Draft a short investigation plan: which facts you still need, which tools you \
         would call for them, and in what order. Do not call any tool yet.\n\
         Answer in {output_language}."
    )
}

/// Tool-selection prompt, one per ReAct iteration.
pub fn choose_tool_prompt(
    current_time: &str,
    task: &str,
    plan: &str,
    background_information: &str,
    tool_call_context: &str,
    tools_info: &str,
    output_language: &str,
) -> String {
    format!(
        "The current time is {current_time}.\n\n\
         Your task:\n{task}\n\n\
         Your plan:\n{plan}\n\n\
         Background information:\n{background_information}\n\n\
         Tool calls made so far (one JSON object per line):\n{tool_call_context}\n\n\
         Available tools (JSON):\n{tools_info}\n\n\
         Select the next tool to call. If you already have enough information to write \
         the final report, select the tool \"final_report\" with empty properties.\n\n\
         Reply with exactly one line in this format and nothing else:\n\
         <Output>{{\"tool_name\": \"<name>\", \"properties\": {{<arguments>}}}}</Output>\n\
         Answer in {output_language}."
    )
}

/// Final report prompt for the thinking model.
pub fn write_result_prompt(
    current_time: &str,
    task: &str,
    background_information: &str,
    plan: &str,
    tool_call_context: &str,
    tools_info: &str,
    output_format: &str,
    output_language: &str,
) -> String {
    format!(
        "The current time is {current_time}.\n\n\
         Your task:\n{task}\n\n\
         Background information:\n{background_information}\n\n\
         Your plan:\n{plan}\n\n\
         Tool calls made and their results (one JSON object per line):\n{tool_call_context}\n\n\
         Tools that were available (JSON):\n{tools_info}\n\n\
         Write your final investment report now. Ground every claim in the background \
         information or a tool result; name the source and time for each piece of \
         evidence. Strictly follow this output format:\n{output_format}\n\
         Answer in {output_language}."
    )
}

/// The standing investment task given to every research agent.
pub const INVEST_TASK: &str = "Based on the market information, the target market snapshot, \
and your belief, identify at most five actionable single-stock trading opportunities for the \
next trading day. For each opportunity decide buy or sell, name the exact symbol, list the \
supporting evidence with sources and times, state the limitations of your analysis, and \
estimate the probability that the trade is profitable.";

/// The strict signal output format appended to the final report prompt.
pub const INVEST_OUTPUT_FORMAT: &str = r#"<Output>
<signal>
<has_opportunity>yes|no</has_opportunity>
<action>buy|sell|HOLD</action>
<symbol_code>exchange code, e.g. 600519.SH</symbol_code>
<symbol_name>company name</symbol_name>
<evidence_list>
  <evidence>description<time>when</time><from_source>source</from_source></evidence>
</evidence_list>
<limitations><limitation>one limitation</limitation></limitations>
<probability>integer 0-100</probability>
</signal>
</Output>"#;

/// Split a factor text into self-contained observations.
pub fn extract_observations_prompt(factor_content: &str) -> String {
    format!(
        "Split the following text into independent observations, each a single \
         self-contained fact or opinion.\n\n\
         ## Factor content\n{factor_content}\n\n\
         ## Requirements\n\
         1. Each observation must stand on its own, with subject, verb, and object \
         complete; a reader must understand it without the original text.\n\
         2. Keep each observation around 100 characters.\n\
         3. Together the observations must cover everything the text mentions.\n\
         4. Do not repeat observations; thin or low-quality input may yield few.\n\n\
         ## Output format\n\
         Reply strictly in this format, enclosed by <Output> and </Output>:\n\n\
         <Output>\n<observation>...</observation>\n<observation>...</observation>\n</Output>"
    )
}

/// Identify the companies/industries an observation could move.
pub fn extract_mentions_prompt(observation_content: &str) -> String {
    format!(
        "You are a financial entity-recognition assistant. Identify every mention \
         (a listed company, or an industry/sector) that could be affected by the \
         event described below.\n\n\
         ## Observation\n{observation_content}\n\n\
         ## Requirements\n\
         1. Mention types: company or industry.\n\
         2. Output 1-3 mentions; each content field holds exactly one name.\n\
         3. If no company is named directly, infer the most likely affected company; \
         failing that, infer the affected industry.\n\n\
         ## Output format\n\
         Reply strictly in this format, enclosed by <Output> and </Output>:\n\n\
         <Output>\n<mention>\n<content>...</content>\n<type>company</type>\n</mention>\n</Output>"
    )
}

/// Score the short-term impact of an observation on each symbol, -2..=2.
pub fn rate_symbols_prompt(observation_content: &str, symbol_list: &str) -> String {
    format!(
        "Analyze the short-term impact of the core event below on each symbol in the \
         list, judging its potential next-trading-day performance, and produce one \
         decision score blending expected move and confidence.\n\n\
         ## Core event (Observation)\n{observation_content}\n\n\
         ## Symbol list\n{symbol_list}\n\n\
         ## Requirements\n\
         1. Analyze each symbol independently, in at most 100 characters each.\n\
         2. Score on the five-level integer scale from -2 to 2:\n\
         2 : clearly up, or high confidence in a rise\n\
         1 : slightly up, or fair confidence in a rise\n\
         0 : range-bound, or no clear direction\n\
         -1 : slightly down, or fair confidence in a fall\n\
         -2 : clearly down, or high confidence in a fall\n\n\
         ## Output format\n\
         Reply strictly in this format, enclosed by <Output> and </Output>:\n\n\
         <Output>\n<result>\n<symbol_name>...</symbol_name>\n<reason>...</reason>\n<rating>...</rating>\n</result>\n</Output>"
    )
}

/// Batched judge prompt scoring every signal at once.
pub fn judge_scoring_prompt(
    date: &str,
    historical_performance: &str,
    all_signals_text: &str,
) -> String {
    format!(
        "You are a strict stock investment analyst who needs to critically evaluate trading \
         signals.\n\n\
         Evaluation date: {date}\n\
         {historical_performance}\n\
         Here is the signal information for all researchers:\n\n\
         {all_signals_text}\n\n\
         Evaluate all signals on these critique criteria (start from 100 points, only deduct, \
         never add):\n\
         1. Analysis quality: confused thinking, lack of depth, unclear logic\n\
         2. Evidence: little evidence, poor quality, lack of persuasiveness\n\
         3. Risk assessment: ignored limitations, unreasonable probability\n\
         4. Opportunity judgment: inaccurate has_opportunity calls\n\
         5. Logical flaws: contradictions, weak reasoning\n\
         6. Data usage: improper or misread data\n\
         7. Historical performance: weigh the researcher's recent track record\n\n\
         Output exactly one line per researcher in this format:\n\
         agent_0: 75|Lack of analytical depth (-15), Moderate evidence (-10)\n\n\
         Format notes:\n\
         - Each line: researcher id, colon, final score, '|', deduction reasons\n\
         - Score range 0 to 100, deducted from 100\n\
         - Use '|' between score and reasons, no other separator"
    )
}
